use std::{
    fmt::Debug,
    hash::{
        Hash,
        Hasher,
    },
    sync::Arc,
    time::Duration,
};

use anyhow::{
    Error,
    Result,
};
use thiserror::Error;

use crate::{
    core::{
        id::Id,
        roles::PeerRole,
        types::{
            Dictionary,
            Value,
        },
    },
    message::message::Message,
    peer::{
        Peer,
        PeerSendError,
    },
};

/// Identity and feature advertisement for a session.
#[derive(Debug, Default, Clone)]
pub struct SessionInfo {
    /// Session ID assigned at establishment; `None` for anonymous sessions.
    pub id: Option<Id>,
    /// Authenticated identity; empty for anonymous sessions.
    pub auth_id: String,
    /// Authenticated role; empty for anonymous sessions.
    pub auth_role: String,
    /// Details advertised at establishment (`roles`, `features`, ...).
    pub details: Dictionary,
}

struct SessionShared {
    peer: Box<dyn Peer>,
    info: SessionInfo,
}

/// One connected client: a peer paired with its identity.
///
/// Identity fields are read-only once the session is handed to the broker.
/// Sessions compare and hash by identity of the shared record rather than by
/// session ID: anonymous sessions carry no ID but are still distinct
/// subscribers.
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    pub fn new(peer: Box<dyn Peer>, info: SessionInfo) -> Self {
        Self {
            shared: Arc::new(SessionShared { peer, info }),
        }
    }

    /// Creates a session with no identity, as used before authentication.
    pub fn anonymous(peer: Box<dyn Peer>) -> Self {
        Self::new(peer, SessionInfo::default())
    }

    pub fn id(&self) -> Option<Id> {
        self.shared.info.id
    }

    pub fn auth_id(&self) -> &str {
        &self.shared.info.auth_id
    }

    pub fn auth_role(&self) -> &str {
        &self.shared.info.auth_role
    }

    pub fn details(&self) -> &Dictionary {
        &self.shared.info.details
    }

    pub fn peer(&self) -> &dyn Peer {
        self.shared.peer.as_ref()
    }

    /// Enqueues an outbound message to the session's peer.
    pub fn send(&self, message: Message) -> Result<(), PeerSendError> {
        self.shared.peer.send(message)
    }

    /// Whether the session details advertise
    /// `roles.<role>.features.<feature> = true`.
    pub fn has_feature(&self, role: PeerRole, feature: &str) -> bool {
        self.shared
            .info
            .details
            .get("roles")
            .and_then(Value::as_dictionary)
            .and_then(|roles| roles.get(role.key_for_details()))
            .and_then(Value::as_dictionary)
            .and_then(|role| role.get("features"))
            .and_then(Value::as_dictionary)
            .and_then(|features| features.get(feature))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("auth_id", &self.auth_id())
            .field("auth_role", &self.auth_role())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Session {}

impl Hash for Session {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.shared) as usize).hash(state);
    }
}

/// Error for no message arriving within the wait window.
#[derive(Debug, Error)]
#[error("timed out waiting for a message")]
pub struct RecvTimeoutError;

/// Waits up to `duration` for the next message on the session's peer.
pub async fn recv_timeout(session: &Session, duration: Duration) -> Result<Message> {
    match tokio::time::timeout(duration, session.peer().recv()).await {
        Ok(Some(message)) => Ok(message),
        Ok(None) => Err(Error::msg("session peer is closed")),
        Err(_) => Err(RecvTimeoutError.into()),
    }
}
