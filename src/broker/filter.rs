use crate::{
    broker::session::Session,
    core::{
        publish_options::PublishOptions,
        roles::{
            FEATURE_SUBSCRIBER_BLACKWHITE_LISTING,
            PeerRole,
        },
    },
};

/// Decides which matched subscribers actually receive a publication.
///
/// Applied after topic matching, before sending. The decision order is fixed:
/// publisher self-exclusion first, then the black lists, then the white
/// lists, so a session barred by any black list never receives the event even
/// if a white list names it. The lists are honored only when the publisher
/// advertises the `subscriber_blackwhite_listing` feature.
pub(crate) struct EventFilter<'a> {
    publisher: &'a Session,
    options: &'a PublishOptions,
    honor_lists: bool,
}

impl<'a> EventFilter<'a> {
    pub fn new(publisher: &'a Session, options: &'a PublishOptions) -> Self {
        let honor_lists =
            publisher.has_feature(PeerRole::Publisher, FEATURE_SUBSCRIBER_BLACKWHITE_LISTING);
        Self {
            publisher,
            options,
            honor_lists,
        }
    }

    /// Whether the subscriber may receive this publication.
    pub fn admits(&self, subscriber: &Session) -> bool {
        if subscriber == self.publisher {
            return !self.options.exclude_me;
        }
        if !self.honor_lists {
            return true;
        }

        if let Some(exclude) = &self.options.exclude {
            if subscriber.id().is_some_and(|id| exclude.contains(&id)) {
                return false;
            }
        }
        if let Some(exclude_authid) = &self.options.exclude_authid {
            if exclude_authid.contains(subscriber.auth_id()) {
                return false;
            }
        }
        if let Some(exclude_authrole) = &self.options.exclude_authrole {
            if exclude_authrole.contains(subscriber.auth_role()) {
                return false;
            }
        }

        if let Some(eligible) = &self.options.eligible {
            if !subscriber.id().is_some_and(|id| eligible.contains(&id)) {
                return false;
            }
        }
        if let Some(eligible_authid) = &self.options.eligible_authid {
            if !eligible_authid.contains(subscriber.auth_id()) {
                return false;
            }
        }
        if let Some(eligible_authrole) = &self.options.eligible_authrole {
            if !eligible_authrole.contains(subscriber.auth_role()) {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod filter_test {
    use crate::{
        broker::{
            filter::EventFilter,
            session::{
                Session,
                SessionInfo,
            },
        },
        core::{
            id::Id,
            publish_options::PublishOptions,
            types::{
                Dictionary,
                HashSet,
                Value,
            },
        },
        peer::ChannelPeer,
    };

    fn blackwhite_listing_publisher_details() -> Dictionary {
        Dictionary::from_iter([(
            "roles".to_owned(),
            Value::Dictionary(Dictionary::from_iter([(
                "publisher".to_owned(),
                Value::Dictionary(Dictionary::from_iter([(
                    "features".to_owned(),
                    Value::Dictionary(Dictionary::from_iter([(
                        "subscriber_blackwhite_listing".to_owned(),
                        Value::Bool(true),
                    )])),
                )])),
            )])),
        )])
    }

    fn listing_publisher() -> Session {
        Session::new(
            Box::new(ChannelPeer::new(1)),
            SessionInfo {
                details: blackwhite_listing_publisher_details(),
                ..Default::default()
            },
        )
    }

    fn subscriber(id: u64, auth_id: &str, auth_role: &str) -> Session {
        Session::new(
            Box::new(ChannelPeer::new(1)),
            SessionInfo {
                id: Some(Id::try_from(id).unwrap()),
                auth_id: auth_id.to_owned(),
                auth_role: auth_role.to_owned(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn excludes_publisher_by_default() {
        let publisher = listing_publisher();
        let options = PublishOptions::default();
        let filter = EventFilter::new(&publisher, &options);
        assert!(!filter.admits(&publisher));

        let options = PublishOptions {
            exclude_me: false,
            ..Default::default()
        };
        let filter = EventFilter::new(&publisher, &options);
        assert!(filter.admits(&publisher));
    }

    #[test]
    fn ignores_lists_without_publisher_feature() {
        let publisher = Session::anonymous(Box::new(ChannelPeer::new(1)));
        let subscriber = subscriber(7, "jdoe", "admin");
        let options = PublishOptions {
            exclude_authid: Some(HashSet::from_iter(["jdoe".to_owned()])),
            ..Default::default()
        };
        let filter = EventFilter::new(&publisher, &options);
        assert!(filter.admits(&subscriber));
    }

    #[test]
    fn applies_black_lists() {
        let publisher = listing_publisher();
        let subscriber = subscriber(7, "jdoe", "admin");

        let options = PublishOptions {
            exclude: Some(HashSet::from_iter([Id::try_from(7).unwrap()])),
            ..Default::default()
        };
        assert!(!EventFilter::new(&publisher, &options).admits(&subscriber));

        let options = PublishOptions {
            exclude_authid: Some(HashSet::from_iter(["jdoe".to_owned()])),
            ..Default::default()
        };
        assert!(!EventFilter::new(&publisher, &options).admits(&subscriber));

        let options = PublishOptions {
            exclude_authrole: Some(HashSet::from_iter(["admin".to_owned()])),
            ..Default::default()
        };
        assert!(!EventFilter::new(&publisher, &options).admits(&subscriber));
    }

    #[test]
    fn applies_white_lists() {
        let publisher = listing_publisher();
        let admitted = subscriber(7, "jdoe", "admin");
        let other = subscriber(8, "msmith", "guest");

        let options = PublishOptions {
            eligible: Some(HashSet::from_iter([Id::try_from(7).unwrap()])),
            eligible_authid: Some(HashSet::from_iter(["jdoe".to_owned()])),
            eligible_authrole: Some(HashSet::from_iter(["admin".to_owned()])),
            ..Default::default()
        };
        let filter = EventFilter::new(&publisher, &options);
        assert!(filter.admits(&admitted));
        assert!(!filter.admits(&other));

        // An anonymous session cannot appear in an `eligible` list.
        let anonymous = Session::anonymous(Box::new(ChannelPeer::new(1)));
        let options = PublishOptions {
            eligible: Some(HashSet::from_iter([Id::try_from(7).unwrap()])),
            ..Default::default()
        };
        assert!(!EventFilter::new(&publisher, &options).admits(&anonymous));
    }

    #[test]
    fn black_lists_take_precedence_over_white_lists() {
        let publisher = listing_publisher();
        let subscriber = subscriber(7, "jdoe", "admin");
        let options = PublishOptions {
            eligible_authid: Some(HashSet::from_iter(["jdoe".to_owned()])),
            exclude_authid: Some(HashSet::from_iter(["jdoe".to_owned()])),
            ..Default::default()
        };
        assert!(!EventFilter::new(&publisher, &options).admits(&subscriber));
    }
}
