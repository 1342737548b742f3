/// A role a peer may take within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerRole {
    // Publishes events to topics.
    Publisher,
    // Subscribes to events for topics.
    Subscriber,
}

impl PeerRole {
    pub fn key_for_details(&self) -> &str {
        match self {
            Self::Publisher => "publisher",
            Self::Subscriber => "subscriber",
        }
    }
}

/// Feature advertised by publishers that want their black/white listing
/// options honored.
pub const FEATURE_SUBSCRIBER_BLACKWHITE_LISTING: &str = "subscriber_blackwhite_listing";

/// Feature advertised by subscribers that accept publisher identity
/// disclosure in event details.
pub const FEATURE_PUBLISHER_IDENTIFICATION: &str = "publisher_identification";
