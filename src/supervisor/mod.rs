//! Liveness supervision
//!
//! Every admitted connection gets its own heartbeat task ticking on the
//! registry's `heartbeat_interval`:
//!
//! - The producer receives the text frame `ping`. A closed transport or a
//!   failed send evicts it. Text `pong` replies are recorded but never reset
//!   a deadline.
//! - A subscriber has its `is_alive` flag cleared and receives a protocol
//!   ping. If the flag is still clear on the next tick the transport is
//!   dropped and the session removed, so a dead peer is gone within two
//!   intervals.
//!
//! Tasks are tracked in [`HeartbeatTimers`], which lives inside the registry
//! state. Removing a connection and cancelling its timer therefore happen in
//! the same critical section.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::registry::config::MIN_HEARTBEAT_INTERVAL;
use crate::registry::{Registry, SubscriberId};
use crate::session::{ConnectionHandle, ConnectionId};

/// Outcome of one heartbeat tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pulse {
    /// Connection is still supervised
    Continue,
    /// Connection is gone; the timer must stop
    Stop,
}

/// Heartbeat tasks keyed by connection id
#[derive(Debug, Default)]
pub struct HeartbeatTimers {
    timers: HashMap<ConnectionId, AbortHandle>,
    stopped: bool,
}

impl HeartbeatTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a timer, cancelling any previous timer for the same id
    ///
    /// Returns false (and aborts `handle`) once [`stop_all`](Self::stop_all)
    /// has run.
    pub fn insert(&mut self, id: ConnectionId, handle: AbortHandle) -> bool {
        if self.stopped {
            handle.abort();
            return false;
        }

        if let Some(previous) = self.timers.insert(id, handle) {
            previous.abort();
        }
        true
    }

    /// Cancel the timer for `id`, if any
    pub fn cancel(&mut self, id: ConnectionId) -> bool {
        match self.timers.remove(&id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every timer and refuse new ones
    pub fn stop_all(&mut self) -> usize {
        self.stopped = true;
        let count = self.timers.len();
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
        count
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.timers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let period = period.max(MIN_HEARTBEAT_INTERVAL);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Spawn the text-ping heartbeat for an installed producer
pub fn spawn_producer_heartbeat(
    registry: Arc<Registry>,
    conn: Arc<ConnectionHandle>,
    period: Duration,
) -> AbortHandle {
    tokio::spawn(async move {
        let mut ticker = ticker(period);
        loop {
            ticker.tick().await;
            if registry.pulse_producer(&conn).await == Pulse::Stop {
                tracing::debug!(session_id = conn.id(), "Producer heartbeat stopped");
                break;
            }
        }
    })
    .abort_handle()
}

/// Spawn the protocol-ping heartbeat for an admitted subscriber
pub fn spawn_subscriber_heartbeat(
    registry: Arc<Registry>,
    id: SubscriberId,
    period: Duration,
) -> AbortHandle {
    tokio::spawn(async move {
        let mut ticker = ticker(period);
        loop {
            ticker.tick().await;
            if registry.pulse_subscriber(&id).await == Pulse::Stop {
                tracing::debug!(client = %id, "Subscriber heartbeat stopped");
                break;
            }
        }
    })
    .abort_handle()
}
