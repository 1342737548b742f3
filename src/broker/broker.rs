use std::sync::Arc;

use anyhow::{
    Error,
    Result,
};
use log::info;
use thiserror::Error;
use tokio::sync::{
    mpsc::{
        UnboundedReceiver,
        UnboundedSender,
        unbounded_channel,
    },
    oneshot,
};

use crate::{
    broker::{
        metrics::BrokerMetrics,
        session::Session,
        state::BrokerState,
    },
    core::error::InteractionError,
    message::message::Message,
};

/// Configuration for a [`Broker`].
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Require canonical (strict) URIs on SUBSCRIBE and PUBLISH.
    pub strict_uri: bool,
    /// Honor `disclose_me` requests from publishers.
    pub allow_disclose: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            strict_uri: false,
            allow_disclose: true,
        }
    }
}

/// Entry counts of the broker's indexes, for tests and operational checks.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BrokerDiagnostics {
    pub exact_subscriptions: usize,
    pub prefix_subscriptions: usize,
    pub wildcard_subscriptions: usize,
    pub exact_topics: usize,
    pub prefix_topics: usize,
    pub wildcard_topics: usize,
    pub sessions: usize,
}

/// Error for an operation on a broker that is no longer running.
#[derive(Debug, Error)]
#[error("broker is closed")]
pub struct BrokerClosedError;

enum BrokerRequest {
    Submit { session: Session, message: Message },
    RemoveSession { session: Session },
    Sync { done_tx: oneshot::Sender<()> },
    Diagnostics { diagnostics_tx: oneshot::Sender<BrokerDiagnostics> },
    Close { done_tx: oneshot::Sender<()> },
}

/// The publish/subscribe core of a WAMP router.
///
/// All broker state is owned by a single worker task. Sessions submit
/// decoded SUBSCRIBE, UNSUBSCRIBE, and PUBLISH messages from any task;
/// submissions are queued and handled one at a time, so no further
/// synchronization exists anywhere in the broker. Replies and events flow
/// out through each session's [`crate::peer::Peer`], which must not block
/// the worker.
///
/// Dropping the broker handle stops the worker once the queue is drained.
pub struct Broker {
    request_tx: UnboundedSender<BrokerRequest>,
    metrics: Arc<BrokerMetrics>,
}

impl Broker {
    /// Creates a new broker and starts its worker task.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(config: BrokerConfig) -> Self {
        let metrics = Arc::new(BrokerMetrics::default());
        let state = BrokerState::new(&config, metrics.clone());
        let (request_tx, request_rx) = unbounded_channel();
        info!("Starting broker: {config:?}");
        tokio::spawn(Self::broker_loop(state, request_rx));
        Self {
            request_tx,
            metrics,
        }
    }

    /// Submits a message from a session for processing.
    ///
    /// Returns as soon as the message is queued; the reply, if any, arrives
    /// on the session's peer. Only SUBSCRIBE, UNSUBSCRIBE, and PUBLISH
    /// messages are routed by the broker.
    pub fn submit(&self, session: Session, message: Message) -> Result<()> {
        match message {
            Message::Subscribe(_) | Message::Unsubscribe(_) | Message::Publish(_) => (),
            _ => {
                return Err(InteractionError::ProtocolViolation(format!(
                    "{} messages are not routed by the broker",
                    message.message_name()
                ))
                .into());
            }
        }
        self.request_tx
            .send(BrokerRequest::Submit { session, message })
            .map_err(|_| BrokerClosedError.into())
    }

    /// Queues teardown of all subscriptions held by the session.
    ///
    /// The session's peer is left untouched and receives no messages.
    pub fn remove_session(&self, session: Session) -> Result<()> {
        self.request_tx
            .send(BrokerRequest::RemoveSession { session })
            .map_err(|_| BrokerClosedError.into())
    }

    /// Waits until all previously queued work has been processed.
    pub async fn sync(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.request_tx
            .send(BrokerRequest::Sync { done_tx })
            .map_err(|_| Error::new(BrokerClosedError))?;
        done_rx.await.map_err(Error::new)
    }

    /// Reads entry counts of the broker's indexes.
    pub async fn diagnostics(&self) -> Result<BrokerDiagnostics> {
        let (diagnostics_tx, diagnostics_rx) = oneshot::channel();
        self.request_tx
            .send(BrokerRequest::Diagnostics { diagnostics_tx })
            .map_err(|_| Error::new(BrokerClosedError))?;
        diagnostics_rx.await.map_err(Error::new)
    }

    /// Stops the broker.
    ///
    /// Work queued before the close is still processed; submissions after it
    /// fail with [`BrokerClosedError`].
    pub async fn close(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.request_tx
            .send(BrokerRequest::Close { done_tx })
            .map_err(|_| Error::new(BrokerClosedError))?;
        done_rx.await.map_err(Error::new)
    }

    /// The broker's traffic counters.
    pub fn metrics(&self) -> Arc<BrokerMetrics> {
        self.metrics.clone()
    }

    async fn broker_loop(mut state: BrokerState, mut request_rx: UnboundedReceiver<BrokerRequest>) {
        while let Some(request) = request_rx.recv().await {
            match request {
                BrokerRequest::Close { done_tx } => {
                    // Refuse new submissions, then drain what was already
                    // queued.
                    request_rx.close();
                    while let Ok(request) = request_rx.try_recv() {
                        Self::handle_request(&mut state, request);
                    }
                    done_tx.send(()).ok();
                    break;
                }
                request => Self::handle_request(&mut state, request),
            }
        }
        info!("Broker loop finished");
    }

    fn handle_request(state: &mut BrokerState, request: BrokerRequest) {
        match request {
            BrokerRequest::Submit { session, message } => state.handle_message(&session, message),
            BrokerRequest::RemoveSession { session } => state.remove_session(&session),
            BrokerRequest::Sync { done_tx } => {
                done_tx.send(()).ok();
            }
            BrokerRequest::Diagnostics { diagnostics_tx } => {
                diagnostics_tx.send(state.diagnostics()).ok();
            }
            BrokerRequest::Close { done_tx } => {
                done_tx.send(()).ok();
            }
        }
    }
}
