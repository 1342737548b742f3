use crate::core::{
    id::Id,
    types::{
        Dictionary,
        Integer,
        List,
    },
    uri::Uri,
};

/// An ERROR message for communicating an error in response to a single
/// request.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    pub request_type: Integer,
    pub request: Id,
    pub details: Dictionary,
    pub error: Uri,
    pub arguments: List,
    pub arguments_keyword: Dictionary,
}

/// A PUBLISH message for publishing an event to a topic.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishMessage {
    pub request: Id,
    pub options: Dictionary,
    pub topic: Uri,
    pub arguments: List,
    pub arguments_keyword: Dictionary,
}

/// A PUBLISHED message for confirming an event was published.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub publish_request: Id,
    pub publication: Id,
}

/// A SUBSCRIBE message for subscribing to a topic.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubscribeMessage {
    pub request: Id,
    pub options: Dictionary,
    pub topic: Uri,
}

/// A SUBSCRIBED message for confirming a peer has subscribed to a topic.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubscribedMessage {
    pub subscribe_request: Id,
    pub subscription: Id,
}

/// An UNSUBSCRIBE message for unsubscribing from a topic.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnsubscribeMessage {
    pub request: Id,
    pub subscribed_subscription: Id,
}

/// An UNSUBSCRIBED message for confirming a peer has unsubscribed from a
/// topic.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnsubscribedMessage {
    pub unsubscribe_request: Id,
}

/// An EVENT message for relaying a published event to subscribers.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EventMessage {
    pub subscribed_subscription: Id,
    pub published_publication: Id,
    pub details: Dictionary,
    pub publish_arguments: List,
    pub publish_arguments_keyword: Dictionary,
}

/// A WAMP message, already decoded from the wire.
///
/// Only the subset of messages the broker consumes and produces is
/// represented; transports and serialization live outside this library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Error(ErrorMessage),
    Publish(PublishMessage),
    Published(PublishedMessage),
    Subscribe(SubscribeMessage),
    Subscribed(SubscribedMessage),
    Unsubscribe(UnsubscribeMessage),
    Unsubscribed(UnsubscribedMessage),
    Event(EventMessage),
}

impl Message {
    /// The message name, mostly for logging.
    pub fn message_name(&self) -> &'static str {
        match self {
            Self::Error(_) => "ERROR",
            Self::Publish(_) => "PUBLISH",
            Self::Published(_) => "PUBLISHED",
            Self::Subscribe(_) => "SUBSCRIBE",
            Self::Subscribed(_) => "SUBSCRIBED",
            Self::Unsubscribe(_) => "UNSUBSCRIBE",
            Self::Unsubscribed(_) => "UNSUBSCRIBED",
            Self::Event(_) => "EVENT",
        }
    }

    /// The numeric message type, as defined by the WAMP standard.
    pub fn tag(&self) -> Integer {
        match self {
            Self::Error(_) => 8,
            Self::Publish(_) => 16,
            Self::Published(_) => 17,
            Self::Subscribe(_) => 32,
            Self::Subscribed(_) => 33,
            Self::Unsubscribe(_) => 34,
            Self::Unsubscribed(_) => 35,
            Self::Event(_) => 36,
        }
    }

    /// The request ID on the message.
    pub fn request_id(&self) -> Option<Id> {
        match self {
            Self::Error(message) => Some(message.request),
            Self::Publish(message) => Some(message.request),
            Self::Published(message) => Some(message.publish_request),
            Self::Subscribe(message) => Some(message.request),
            Self::Subscribed(message) => Some(message.subscribe_request),
            Self::Unsubscribe(message) => Some(message.request),
            Self::Unsubscribed(message) => Some(message.unsubscribe_request),
            Self::Event(_) => None,
        }
    }

    /// The details dictionary on the message.
    pub fn details(&self) -> Option<&Dictionary> {
        match self {
            Self::Error(message) => Some(&message.details),
            Self::Event(message) => Some(&message.details),
            _ => None,
        }
    }
}
