//! Graceful shutdown
//!
//! The shutdown sequence runs once, no matter how many times it is requested:
//!
//! 1. stop every heartbeat timer (and refuse new admissions)
//! 2. broadcast `server-shutdown` to subscribers
//! 3. wait the notice delay so the notice can reach them
//! 4. close every subscriber with 1001
//! 5. send the final notice to the producer, then close it
//! 6. stop both accept loops

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::protocol::constants::{
    CLOSE_GOING_AWAY, PRODUCER_SHUTDOWN_NOTICE, SHUTDOWN_CLOSE_REASON,
};
use crate::protocol::ServerEvent;
use crate::registry::Registry;
use crate::stats::StatsSnapshot;

/// What one shutdown run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Heartbeat timers cancelled
    pub timers_stopped: usize,
    /// Subscribers the notice was queued for
    pub notified: usize,
    /// Subscribers closed with 1001
    pub subscribers_closed: usize,
    /// Whether a producer was notified and closed
    pub producer_released: bool,
    /// Counters at the end of the run
    pub stats: StatsSnapshot,
}

/// Coordinates the shutdown sequence
#[derive(Debug)]
pub struct Lifecycle {
    registry: Arc<Registry>,
    listeners: CancellationToken,
    notice_delay: Duration,
    started: AtomicBool,
}

impl Lifecycle {
    pub fn new(registry: Arc<Registry>, notice_delay: Duration) -> Self {
        Self {
            registry,
            listeners: CancellationToken::new(),
            notice_delay,
            started: AtomicBool::new(false),
        }
    }

    /// Token cancelled once the accept loops must stop
    pub fn listener_token(&self) -> CancellationToken {
        self.listeners.clone()
    }

    /// Whether shutdown was requested
    pub fn is_shutting_down(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Run the shutdown sequence
    ///
    /// Returns `None` if it already ran (or is running).
    pub async fn shutdown(&self) -> Option<ShutdownReport> {
        if self.started.swap(true, Ordering::AcqRel) {
            return None;
        }

        tracing::info!("Shutting down relay");

        let timers_stopped = self.registry.stop_heartbeats().await;
        let notified = self.registry.broadcast(&ServerEvent::server_shutdown()).await;

        tokio::time::sleep(self.notice_delay).await;

        let subscribers_closed = self
            .registry
            .drain_subscribers(CLOSE_GOING_AWAY, SHUTDOWN_CLOSE_REASON)
            .await;
        let producer_released = self
            .registry
            .release_producer(PRODUCER_SHUTDOWN_NOTICE, CLOSE_GOING_AWAY, SHUTDOWN_CLOSE_REASON)
            .await;

        self.listeners.cancel();

        let report = ShutdownReport {
            timers_stopped,
            notified,
            subscribers_closed,
            producer_released,
            stats: self.registry.stats().snapshot(),
        };

        tracing::info!(
            timers = report.timers_stopped,
            notified = report.notified,
            subscribers = report.subscribers_closed,
            producer = report.producer_released,
            frames_relayed = report.stats.frames_relayed,
            deliveries = report.stats.deliveries,
            uptime_secs = report.stats.uptime.as_secs(),
            "Shutdown complete"
        );

        Some(report)
    }
}
