use thiserror::Error;

/// An interaction error that occurs while processing a WAMP message.
///
/// Interaction errors are clearly defined in the WAMP standard and are
/// reserved for errors that peers must be able to parse easily.
#[derive(Debug, Error)]
pub enum InteractionError {
    /// The incoming message violates the WAMP protocol.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// The subscription being referenced does not exist.
    #[error("no such subscription")]
    NoSuchSubscription,
}

impl InteractionError {
    /// The trailing URI component for the error.
    pub fn uri_component(&self) -> &str {
        match self {
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::NoSuchSubscription => "no_such_subscription",
        }
    }
}
