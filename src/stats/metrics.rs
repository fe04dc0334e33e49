//! Relay counters
//!
//! Lock-free counters updated on the relay path and read for status replies
//! and the shutdown summary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Process-wide relay counters
#[derive(Debug)]
pub struct RelayStats {
    /// When the relay started
    started_at: Instant,
    /// Frames delivered to at least one subscriber
    frames_relayed: AtomicU64,
    /// Payload bytes of relayed frames (counted once per frame)
    bytes_relayed: AtomicU64,
    /// Individual frame deliveries across all subscribers
    deliveries: AtomicU64,
    /// Frames discarded because nobody was subscribed
    frames_discarded: AtomicU64,
    /// Producers installed
    producers_admitted: AtomicU64,
    /// Subscribers admitted
    subscribers_admitted: AtomicU64,
    /// Subscribers dropped for send failure or missed heartbeat
    subscribers_dropped: AtomicU64,
}

impl RelayStats {
    /// Create new counters starting now
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            frames_relayed: AtomicU64::new(0),
            bytes_relayed: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            frames_discarded: AtomicU64::new(0),
            producers_admitted: AtomicU64::new(0),
            subscribers_admitted: AtomicU64::new(0),
            subscribers_dropped: AtomicU64::new(0),
        }
    }

    /// Time since the relay started
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub(crate) fn record_relay(&self, bytes: usize, deliveries: usize) {
        self.frames_relayed.fetch_add(1, Ordering::Relaxed);
        self.bytes_relayed.fetch_add(bytes as u64, Ordering::Relaxed);
        self.deliveries
            .fetch_add(deliveries as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_discard(&self) {
        self.frames_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_producer(&self) {
        self.producers_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_subscriber(&self) {
        self.subscribers_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, count: usize) {
        self.subscribers_dropped
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime: self.uptime(),
            frames_relayed: self.frames_relayed.load(Ordering::Relaxed),
            bytes_relayed: self.bytes_relayed.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            producers_admitted: self.producers_admitted.load(Ordering::Relaxed),
            subscribers_admitted: self.subscribers_admitted.load(Ordering::Relaxed),
            subscribers_dropped: self.subscribers_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy of [`RelayStats`] at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub uptime: Duration,
    pub frames_relayed: u64,
    pub bytes_relayed: u64,
    pub deliveries: u64,
    pub frames_discarded: u64,
    pub producers_admitted: u64,
    pub subscribers_admitted: u64,
    pub subscribers_dropped: u64,
}
