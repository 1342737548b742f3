use std::sync::atomic::{
    AtomicU64,
    Ordering,
};

/// Counters tracking broker traffic.
///
/// Shared by `Arc` between the broker loop and its observers; counters only
/// ever increase.
#[derive(Debug, Default)]
pub struct BrokerMetrics {
    messages_received: AtomicU64,
    publications: AtomicU64,
    events_sent: AtomicU64,
    events_dropped: AtomicU64,
}

impl BrokerMetrics {
    pub(crate) fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_publication(&self) {
        self.publications.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_event_sent(&self) {
        self.events_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Messages submitted to the broker loop.
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// PUBLISH messages accepted for dispatch.
    pub fn publications(&self) -> u64 {
        self.publications.load(Ordering::Relaxed)
    }

    /// EVENT messages handed to subscriber peers.
    pub fn events_sent(&self) -> u64 {
        self.events_sent.load(Ordering::Relaxed)
    }

    /// EVENT messages dropped because a subscriber peer could not take them.
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }
}
