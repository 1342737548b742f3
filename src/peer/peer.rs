use async_trait::async_trait;
use futures_util::lock::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::message::message::Message;

/// Error for a message that could not be handed to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PeerSendError {
    /// The peer's outbound buffer is full; the message was dropped.
    #[error("peer buffer is full")]
    Full,
    /// The peer is closed.
    #[error("peer is closed")]
    Closed,
}

/// A bidirectional message channel to one client.
///
/// `send` must never block the caller: implementations buffer a bounded
/// number of outbound messages and report overflow as an error, so a slow
/// client cannot stall whoever is fanning out to many peers.
#[async_trait]
pub trait Peer: Send + Sync {
    /// Enqueues an outbound message to this client.
    fn send(&self, message: Message) -> Result<(), PeerSendError>;

    /// Receives the next inbound message from this client.
    ///
    /// Returns `None` once the peer is closed and drained.
    async fn recv(&self) -> Option<Message>;

    /// Closes the channel. Buffered messages may still be received.
    async fn close(&self);
}

/// An in-process [`Peer`] over a bounded channel.
///
/// The channel is a loopback: messages passed to [`Peer::send`] come back
/// out of [`Peer::recv`]. Sends while the buffer is full fail with
/// [`PeerSendError::Full`] rather than waiting for the reader.
pub struct ChannelPeer {
    message_tx: mpsc::Sender<Message>,
    message_rx: Mutex<mpsc::Receiver<Message>>,
}

impl ChannelPeer {
    /// Creates a new peer buffering at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        let (message_tx, message_rx) = mpsc::channel(capacity);
        Self {
            message_tx,
            message_rx: Mutex::new(message_rx),
        }
    }
}

#[async_trait]
impl Peer for ChannelPeer {
    fn send(&self, message: Message) -> Result<(), PeerSendError> {
        self.message_tx.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => PeerSendError::Full,
            mpsc::error::TrySendError::Closed(_) => PeerSendError::Closed,
        })
    }

    async fn recv(&self) -> Option<Message> {
        self.message_rx.lock().await.recv().await
    }

    async fn close(&self) {
        self.message_rx.lock().await.close();
    }
}
