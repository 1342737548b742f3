use std::sync::Arc;

use anyhow::Result;
use log::{
    debug,
    trace,
    warn,
};

use crate::{
    broker::{
        broker::{
            BrokerConfig,
            BrokerDiagnostics,
        },
        filter::EventFilter,
        metrics::BrokerMetrics,
        session::Session,
    },
    core::{
        error::InteractionError,
        id::{
            Id,
            IdAllocator,
            SequentialIdAllocator,
        },
        match_style::MatchStyle,
        publish_options::PublishOptions,
        roles::{
            FEATURE_PUBLISHER_IDENTIFICATION,
            PeerRole,
        },
        types::{
            Dictionary,
            HashMap,
            HashSet,
            IndexMap,
            Value,
        },
        uri::{
            InvalidUri,
            Uri,
            validate_pattern_uri,
            validate_uri,
        },
    },
    message::{
        common::error_for_request,
        message::{
            EventMessage,
            Message,
            PublishMessage,
            PublishedMessage,
            SubscribeMessage,
            SubscribedMessage,
            UnsubscribeMessage,
            UnsubscribedMessage,
        },
    },
};

/// Subscribers to one topic or topic pattern, in subscription order.
///
/// The value is the subscription ID the session holds for the topic within
/// one match style.
type Subscribers = IndexMap<Session, Id>;

/// All broker state, owned by the broker loop.
///
/// One subscription index per match style: `subscriptions` maps subscription
/// IDs back to their topic, `topic_subscribers` maps topics to their ordered
/// subscriber sets. `session_sub_ids` is a back-index over all three styles
/// so that tearing a session down touches only its own subscriptions.
pub(crate) struct BrokerState {
    strict_uri: bool,
    allow_disclose: bool,

    subscriptions: HashMap<Id, Uri>,
    pfx_subscriptions: HashMap<Id, Uri>,
    wc_subscriptions: HashMap<Id, Uri>,

    topic_subscribers: HashMap<Uri, Subscribers>,
    pfx_topic_subscribers: HashMap<Uri, Subscribers>,
    wc_topic_subscribers: HashMap<Uri, Subscribers>,

    session_sub_ids: HashMap<Session, HashSet<Id>>,

    sub_id_allocator: SequentialIdAllocator,
    pub_id_allocator: SequentialIdAllocator,

    metrics: Arc<BrokerMetrics>,
}

impl BrokerState {
    pub fn new(config: &BrokerConfig, metrics: Arc<BrokerMetrics>) -> Self {
        Self {
            strict_uri: config.strict_uri,
            allow_disclose: config.allow_disclose,
            subscriptions: HashMap::default(),
            pfx_subscriptions: HashMap::default(),
            wc_subscriptions: HashMap::default(),
            topic_subscribers: HashMap::default(),
            pfx_topic_subscribers: HashMap::default(),
            wc_topic_subscribers: HashMap::default(),
            session_sub_ids: HashMap::default(),
            sub_id_allocator: SequentialIdAllocator::default(),
            pub_id_allocator: SequentialIdAllocator::default(),
            metrics,
        }
    }

    /// Handles one message submitted by a session.
    ///
    /// Failures are reported back to the submitting session as ERROR
    /// messages and leave the state untouched.
    pub fn handle_message(&mut self, session: &Session, message: Message) {
        self.metrics.record_message_received();
        trace!("Broker received {} message: {message:?}", message.message_name());
        let result = match &message {
            Message::Subscribe(subscribe) => self.subscribe(session, subscribe),
            Message::Unsubscribe(unsubscribe) => self.unsubscribe(session, unsubscribe),
            Message::Publish(publish) => self.publish(session, publish),
            _ => {
                warn!(
                    "Broker dropped an unexpected {} message",
                    message.message_name()
                );
                return;
            }
        };
        if let Err(err) = result {
            debug!("{} message failed: {err}", message.message_name());
            self.send_to(session, error_for_request(&message, &err));
        }
    }

    /// Tears down all subscriptions held by the session.
    ///
    /// No messages are sent to the session's peer.
    pub fn remove_session(&mut self, session: &Session) {
        let Some(sub_ids) = self.session_sub_ids.remove(session) else {
            return;
        };
        for sub_id in sub_ids {
            let Some(style) = self.style_of(sub_id) else {
                continue;
            };
            let (subscriptions, topic_subscribers) = self.indexes_mut(style);
            if let Some(topic) = subscriptions.remove(&sub_id) {
                Self::remove_subscriber(topic_subscribers, &topic, session);
            }
        }
        debug!("Removed session {session:?} and all of its subscriptions");
    }

    pub fn diagnostics(&self) -> BrokerDiagnostics {
        BrokerDiagnostics {
            exact_subscriptions: self.subscriptions.len(),
            prefix_subscriptions: self.pfx_subscriptions.len(),
            wildcard_subscriptions: self.wc_subscriptions.len(),
            exact_topics: self.topic_subscribers.len(),
            prefix_topics: self.pfx_topic_subscribers.len(),
            wildcard_topics: self.wc_topic_subscribers.len(),
            sessions: self.session_sub_ids.len(),
        }
    }

    fn subscribe(&mut self, session: &Session, message: &SubscribeMessage) -> Result<()> {
        let style = MatchStyle::from_options(&message.options);
        self.validate_topic(&message.topic, style)?;

        // Re-subscribing to the same topic and style yields the existing
        // subscription.
        let existing = self
            .subscribers_of(style)
            .get(&message.topic)
            .and_then(|subscribers| subscribers.get(session))
            .copied();

        let sub_id = match existing {
            Some(sub_id) => sub_id,
            None => {
                let sub_id = self.sub_id_allocator.generate_id();
                let (subscriptions, topic_subscribers) = self.indexes_mut(style);
                subscriptions.insert(sub_id, message.topic.clone());
                topic_subscribers
                    .entry(message.topic.clone())
                    .or_default()
                    .insert(session.clone(), sub_id);
                self.session_sub_ids
                    .entry(session.clone())
                    .or_default()
                    .insert(sub_id);
                debug!(
                    "Session {session:?} subscribed to {} ({}) with subscription {sub_id}",
                    message.topic,
                    Into::<&'static str>::into(style),
                );
                sub_id
            }
        };

        self.send_to(
            session,
            Message::Subscribed(SubscribedMessage {
                subscribe_request: message.request,
                subscription: sub_id,
            }),
        );
        Ok(())
    }

    fn unsubscribe(&mut self, session: &Session, message: &UnsubscribeMessage) -> Result<()> {
        let sub_id = message.subscribed_subscription;
        let style = self
            .style_of(sub_id)
            .ok_or(InteractionError::NoSuchSubscription)?;

        let (subscriptions, topic_subscribers) = self.indexes_mut(style);
        if let Some(topic) = subscriptions.remove(&sub_id) {
            Self::remove_subscriber(topic_subscribers, &topic, session);
        }
        if let Some(sub_ids) = self.session_sub_ids.get_mut(session) {
            sub_ids.remove(&sub_id);
            if sub_ids.is_empty() {
                self.session_sub_ids.remove(session);
            }
        }
        debug!("Session {session:?} unsubscribed from subscription {sub_id}");

        self.send_to(
            session,
            Message::Unsubscribed(UnsubscribedMessage {
                unsubscribe_request: message.request,
            }),
        );
        Ok(())
    }

    fn publish(&mut self, session: &Session, message: &PublishMessage) -> Result<()> {
        self.validate_topic(&message.topic, MatchStyle::Exact)?;

        let options = PublishOptions::from(message);
        let publication_id = self.pub_id_allocator.generate_id();
        self.metrics.record_publication();

        let filter = EventFilter::new(session, &options);
        let fanout = EventFanout {
            publication_id,
            message,
            publisher: session,
            disclose_publisher: self.allow_disclose && options.disclose_me,
        };

        if let Some(subscribers) = self.topic_subscribers.get(&message.topic) {
            for (subscriber, sub_id) in subscribers {
                if filter.admits(subscriber) {
                    fanout.send(subscriber, *sub_id, None, &self.metrics);
                }
            }
        }
        for (pattern, subscribers) in &self.pfx_topic_subscribers {
            if !pattern.prefix_match(&message.topic) {
                continue;
            }
            for (subscriber, sub_id) in subscribers {
                if filter.admits(subscriber) {
                    fanout.send(subscriber, *sub_id, Some(&message.topic), &self.metrics);
                }
            }
        }
        for (pattern, subscribers) in &self.wc_topic_subscribers {
            if !pattern.wildcard_match(&message.topic) {
                continue;
            }
            for (subscriber, sub_id) in subscribers {
                if filter.admits(subscriber) {
                    fanout.send(subscriber, *sub_id, Some(&message.topic), &self.metrics);
                }
            }
        }

        if options.acknowledge {
            self.send_to(
                session,
                Message::Published(PublishedMessage {
                    publish_request: message.request,
                    publication: publication_id,
                }),
            );
        }
        Ok(())
    }

    fn validate_topic(&self, topic: &Uri, style: MatchStyle) -> Result<(), InvalidUri> {
        match style {
            MatchStyle::Exact => validate_uri(topic, self.strict_uri),
            MatchStyle::Prefix | MatchStyle::Wildcard => {
                validate_pattern_uri(topic, self.strict_uri)
            }
        }
    }

    fn subscribers_of(&self, style: MatchStyle) -> &HashMap<Uri, Subscribers> {
        match style {
            MatchStyle::Exact => &self.topic_subscribers,
            MatchStyle::Prefix => &self.pfx_topic_subscribers,
            MatchStyle::Wildcard => &self.wc_topic_subscribers,
        }
    }

    fn indexes_mut(
        &mut self,
        style: MatchStyle,
    ) -> (&mut HashMap<Id, Uri>, &mut HashMap<Uri, Subscribers>) {
        match style {
            MatchStyle::Exact => (&mut self.subscriptions, &mut self.topic_subscribers),
            MatchStyle::Prefix => (&mut self.pfx_subscriptions, &mut self.pfx_topic_subscribers),
            MatchStyle::Wildcard => (&mut self.wc_subscriptions, &mut self.wc_topic_subscribers),
        }
    }

    /// The match style whose index holds the subscription ID.
    fn style_of(&self, sub_id: Id) -> Option<MatchStyle> {
        if self.subscriptions.contains_key(&sub_id) {
            Some(MatchStyle::Exact)
        } else if self.pfx_subscriptions.contains_key(&sub_id) {
            Some(MatchStyle::Prefix)
        } else if self.wc_subscriptions.contains_key(&sub_id) {
            Some(MatchStyle::Wildcard)
        } else {
            None
        }
    }

    fn remove_subscriber(
        topic_subscribers: &mut HashMap<Uri, Subscribers>,
        topic: &Uri,
        session: &Session,
    ) {
        if let Some(subscribers) = topic_subscribers.get_mut(topic) {
            subscribers.shift_remove(session);
            if subscribers.is_empty() {
                topic_subscribers.remove(topic);
            }
        }
    }

    fn send_to(&self, session: &Session, message: Message) {
        let message_name = message.message_name();
        if let Err(err) = session.send(message) {
            warn!("Failed to send {message_name} message to session {session:?}: {err}");
        }
    }
}

/// The per-publication invariants of one fan-out.
struct EventFanout<'a> {
    publication_id: Id,
    message: &'a PublishMessage,
    publisher: &'a Session,
    disclose_publisher: bool,
}

impl EventFanout<'_> {
    /// Sends the publication's EVENT to one admitted subscriber.
    ///
    /// `concrete_topic` is set for pattern-based subscriptions, which need
    /// the details to recover the topic the event was published on.
    fn send(
        &self,
        subscriber: &Session,
        sub_id: Id,
        concrete_topic: Option<&Uri>,
        metrics: &BrokerMetrics,
    ) {
        let mut details = Dictionary::default();
        if let Some(topic) = concrete_topic {
            details.insert("topic".to_owned(), Value::from(topic.clone()));
        }
        if self.disclose_publisher
            && subscriber.has_feature(PeerRole::Subscriber, FEATURE_PUBLISHER_IDENTIFICATION)
        {
            if let Some(publisher_id) = self.publisher.id() {
                details.insert("publisher".to_owned(), Value::from(publisher_id));
            }
        }

        let event = Message::Event(EventMessage {
            subscribed_subscription: sub_id,
            published_publication: self.publication_id,
            details,
            publish_arguments: self.message.arguments.clone(),
            publish_arguments_keyword: self.message.arguments_keyword.clone(),
        });
        match subscriber.send(event) {
            Ok(()) => metrics.record_event_sent(),
            Err(err) => {
                metrics.record_event_dropped();
                warn!(
                    "Dropped event {} on {} for subscriber {subscriber:?}: {err}",
                    self.publication_id, self.message.topic,
                );
            }
        }
    }
}

#[cfg(test)]
mod state_test {
    use std::{
        sync::Arc,
        time::Duration,
    };

    use pretty_assertions::assert_eq;

    use crate::{
        broker::{
            broker::BrokerConfig,
            metrics::BrokerMetrics,
            session::{
                Session,
                recv_timeout,
            },
            state::BrokerState,
        },
        core::{
            id::Id,
            types::{
                Dictionary,
                Value,
            },
            uri::Uri,
        },
        message::message::{
            Message,
            PublishMessage,
            SubscribeMessage,
            UnsubscribeMessage,
        },
        peer::ChannelPeer,
    };

    fn new_state() -> BrokerState {
        BrokerState::new(&BrokerConfig::default(), Arc::new(BrokerMetrics::default()))
    }

    fn new_session() -> Session {
        Session::anonymous(Box::new(ChannelPeer::new(8)))
    }

    fn subscribe_message(request: u64, topic: &str) -> Message {
        Message::Subscribe(SubscribeMessage {
            request: Id::try_from(request).unwrap(),
            options: Dictionary::default(),
            topic: Uri::from(topic),
        })
    }

    fn subscribe_message_with_style(request: u64, topic: &str, style: &str) -> Message {
        Message::Subscribe(SubscribeMessage {
            request: Id::try_from(request).unwrap(),
            options: Dictionary::from_iter([("match".to_owned(), Value::from(style))]),
            topic: Uri::from(topic),
        })
    }

    async fn subscribed_id(session: &Session) -> Id {
        match recv_timeout(session, Duration::from_millis(10)).await {
            Ok(Message::Subscribed(subscribed)) => subscribed.subscription,
            other => panic!("expected SUBSCRIBED, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn creates_subscription_state() {
        let mut state = new_state();
        let session = new_session();
        let topic = Uri::from("nexus.test.topic");

        state.handle_message(&session, subscribe_message(123, "nexus.test.topic"));
        let sub_id = subscribed_id(&session).await;
        assert!(sub_id >= Id::MIN);
        assert_eq!(state.subscriptions.get(&sub_id), Some(&topic));
        assert!(state.topic_subscribers.get(&topic).is_some_and(|subscribers| {
            subscribers.get(&session) == Some(&sub_id)
        }));
        assert!(state.session_sub_ids.get(&session).is_some_and(|sub_ids| {
            sub_ids.contains(&sub_id)
        }));

        // Subscribing again yields the same subscription.
        state.handle_message(&session, subscribe_message(124, "nexus.test.topic"));
        assert_eq!(subscribed_id(&session).await, sub_id);
        assert_eq!(state.subscriptions.len(), 1);
        assert_eq!(state.topic_subscribers.get(&topic).unwrap().len(), 1);
        assert_eq!(state.session_sub_ids.get(&session).unwrap().len(), 1);

        // Subscribing to a different topic yields a new subscription.
        let topic_2 = Uri::from("nexus.test.topic2");
        state.handle_message(&session, subscribe_message(125, "nexus.test.topic2"));
        let sub_id_2 = subscribed_id(&session).await;
        assert_ne!(sub_id_2, sub_id);
        assert_eq!(state.subscriptions.len(), 2);
        assert_eq!(state.topic_subscribers.get(&topic).unwrap().len(), 1);
        assert_eq!(state.topic_subscribers.get(&topic_2).unwrap().len(), 1);
        assert_eq!(state.session_sub_ids.get(&session).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn indexes_pattern_subscriptions_separately() {
        let mut state = new_state();
        let session = new_session();

        state.handle_message(
            &session,
            subscribe_message_with_style(123, "nexus.test.", "prefix"),
        );
        let pfx_sub_id = subscribed_id(&session).await;
        state.handle_message(
            &session,
            subscribe_message_with_style(124, "nexus..topic", "wildcard"),
        );
        let wc_sub_id = subscribed_id(&session).await;

        assert!(state.subscriptions.is_empty());
        assert_eq!(
            state.pfx_subscriptions.get(&pfx_sub_id),
            Some(&Uri::from("nexus.test.")),
        );
        assert_eq!(
            state.wc_subscriptions.get(&wc_sub_id),
            Some(&Uri::from("nexus..topic")),
        );
        assert!(state.pfx_topic_subscribers.contains_key(&Uri::from("nexus.test.")));
        assert!(state.wc_topic_subscribers.contains_key(&Uri::from("nexus..topic")));
        assert_eq!(state.session_sub_ids.get(&session).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn removes_subscription_state_on_unsubscribe() {
        let mut state = new_state();
        let session = new_session();
        let topic = Uri::from("nexus.test.topic");

        state.handle_message(&session, subscribe_message(123, "nexus.test.topic"));
        let sub_id = subscribed_id(&session).await;

        state.handle_message(
            &session,
            Message::Unsubscribe(UnsubscribeMessage {
                request: Id::try_from(124).unwrap(),
                subscribed_subscription: sub_id,
            }),
        );
        assert_matches::assert_matches!(
            recv_timeout(&session, Duration::from_millis(10)).await,
            Ok(Message::Unsubscribed(unsubscribed)) => {
                assert_eq!(unsubscribed.unsubscribe_request, Id::try_from(124).unwrap());
            }
        );
        assert!(state.subscriptions.is_empty());
        assert!(!state.topic_subscribers.contains_key(&topic));
        assert!(!state.session_sub_ids.contains_key(&session));
    }

    #[tokio::test]
    async fn rejects_unknown_subscription_on_unsubscribe() {
        let mut state = new_state();
        let session = new_session();

        state.handle_message(
            &session,
            Message::Unsubscribe(UnsubscribeMessage {
                request: Id::try_from(124).unwrap(),
                subscribed_subscription: Id::try_from(99).unwrap(),
            }),
        );
        assert_matches::assert_matches!(
            recv_timeout(&session, Duration::from_millis(10)).await,
            Ok(Message::Error(error)) => {
                assert_eq!(error.request_type, 34);
                assert_eq!(error.request, Id::try_from(124).unwrap());
                assert_eq!(error.error, Uri::from("wamp.error.no_such_subscription"));
            }
        );
    }

    #[tokio::test]
    async fn removes_all_subscriptions_on_session_removal() {
        let mut state = new_state();
        let session = new_session();

        state.handle_message(&session, subscribe_message(123, "nexus.test.topic"));
        let sub_id = subscribed_id(&session).await;
        state.handle_message(&session, subscribe_message(456, "nexus.test.topic2"));
        let sub_id_2 = subscribed_id(&session).await;
        assert_ne!(sub_id, sub_id_2);

        state.remove_session(&session);

        assert!(state.subscriptions.is_empty());
        assert!(state.topic_subscribers.is_empty());
        assert!(state.session_sub_ids.is_empty());
    }

    #[tokio::test]
    async fn keeps_topic_alive_for_remaining_subscribers() {
        let mut state = new_state();
        let session = new_session();
        let session_2 = new_session();
        let topic = Uri::from("nexus.test.topic");

        state.handle_message(&session, subscribe_message(123, "nexus.test.topic"));
        subscribed_id(&session).await;
        state.handle_message(&session_2, subscribe_message(124, "nexus.test.topic"));
        subscribed_id(&session_2).await;

        state.remove_session(&session);

        assert_eq!(state.subscriptions.len(), 1);
        assert_eq!(state.topic_subscribers.get(&topic).unwrap().len(), 1);
        assert!(state.topic_subscribers.get(&topic).unwrap().contains_key(&session_2));
        assert!(!state.session_sub_ids.contains_key(&session));
        assert!(state.session_sub_ids.contains_key(&session_2));
    }

    #[tokio::test]
    async fn rejects_invalid_topic_without_state_change() {
        let mut state = BrokerState::new(
            &BrokerConfig {
                strict_uri: true,
                ..Default::default()
            },
            Arc::new(BrokerMetrics::default()),
        );
        let session = new_session();

        state.handle_message(&session, subscribe_message(123, "nexus..topic"));
        assert_matches::assert_matches!(
            recv_timeout(&session, Duration::from_millis(10)).await,
            Ok(Message::Error(error)) => {
                assert_eq!(error.request_type, 32);
                assert_eq!(error.error, Uri::from("wamp.error.invalid_uri"));
            }
        );
        assert!(state.subscriptions.is_empty());
        assert!(state.topic_subscribers.is_empty());
        assert!(state.session_sub_ids.is_empty());

        state.handle_message(
            &session,
            Message::Publish(PublishMessage {
                request: Id::try_from(124).unwrap(),
                options: Dictionary::default(),
                topic: Uri::from("NEXUS.TEST.TOPIC"),
                ..Default::default()
            }),
        );
        assert_matches::assert_matches!(
            recv_timeout(&session, Duration::from_millis(10)).await,
            Ok(Message::Error(error)) => {
                assert_eq!(error.request_type, 16);
                assert_eq!(error.error, Uri::from("wamp.error.invalid_uri"));
            }
        );
    }
}
