//! Connection registry implementation
//!
//! The registry owns the producer slot and the subscriber set. Every
//! operation takes the state lock once and runs to completion without
//! awaiting again, so admissions, evictions, broadcasts and removals are
//! linearizable. Frames are only ever enqueued on connection queues; no
//! operation waits on a socket.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use super::config::RegistryConfig;
use super::entry::{ProducerSlot, StatusSnapshot, SubscriberSession};
use super::error::RegistryError;
use super::frame::{RelayFrame, SubscriberId};
use crate::protocol::constants::{
    CLOSE_REPLACED, COMMAND_LISTEN, PRODUCER_CONFIRMATION, PRODUCER_PING, REPLACED_CLOSE_REASON,
};
use crate::protocol::{now_millis, ClientEntry, ServerEvent};
use crate::session::{ConnectionHandle, ConnectionId, Outbound, Role, SendError};
use crate::stats::RelayStats;
use crate::supervisor::{self, HeartbeatTimers, Pulse};

const STREAM_STARTED: &str = "Audio stream started";
const STREAM_STOPPED: &str = "Audio stream stopped";
const STREAM_ACTIVE: &str = "Audio stream active";
const WAITING_FOR_PRODUCER: &str = "Waiting for ESP32";

/// State guarded by the registry lock
#[derive(Debug, Default)]
struct RegistryState {
    /// The installed producer, if any
    producer: Option<ProducerSlot>,

    /// Admitted subscribers
    subscribers: HashMap<SubscriberId, SubscriberSession>,

    /// Heartbeat tasks for every supervised connection
    timers: HeartbeatTimers,

    /// Set once shutdown began
    closing: bool,
}

impl RegistryState {
    fn is_producer(&self, id: ConnectionId) -> bool {
        self.producer
            .as_ref()
            .is_some_and(|slot| slot.conn.id() == id)
    }

    /// Queue `frame` on every subscriber, purging the ones that cannot take it
    fn fan_out(&mut self, frame: &Outbound, stats: &RelayStats) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for (id, session) in &self.subscribers {
            if !session.conn.is_open() {
                dead.push(id.clone());
                continue;
            }
            match session.conn.send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!(
                        client = %id,
                        session_id = session.conn.id(),
                        error = %e,
                        "Send failed, dropping subscriber"
                    );
                    dead.push(id.clone());
                }
            }
        }

        if !dead.is_empty() {
            for id in &dead {
                if let Some(session) = self.remove_subscriber_locked(id) {
                    session.conn.terminate();
                }
            }
            stats.record_dropped(dead.len());
            tracing::info!(
                dropped = dead.len(),
                subscribers = self.subscribers.len(),
                "Purged dead subscribers"
            );
        }

        delivered
    }

    /// Serialize `event` once and fan it out
    fn fan_out_event(&mut self, event: &ServerEvent, stats: &RelayStats) -> usize {
        match event.encode() {
            Ok(text) => self.fan_out(&Outbound::Text(text), stats),
            Err(e) => {
                tracing::error!(event = event.kind(), error = %e, "Failed to encode event");
                0
            }
        }
    }

    fn remove_subscriber_locked(&mut self, id: &SubscriberId) -> Option<SubscriberSession> {
        let session = self.subscribers.remove(id)?;
        self.timers.cancel(session.conn.id());
        Some(session)
    }

    /// Clear the producer slot if `id` holds it and announce the loss
    fn evict_producer_locked(
        &mut self,
        id: ConnectionId,
        stats: &RelayStats,
    ) -> Option<ProducerSlot> {
        if !self.is_producer(id) {
            return None;
        }

        let slot = self.producer.take()?;
        self.timers.cancel(id);
        slot.conn.set_role(Role::Pending);
        self.fan_out_event(
            &ServerEvent::streaming_status(false, false, STREAM_STOPPED),
            stats,
        );

        Some(slot)
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            streaming: self
                .producer
                .as_ref()
                .is_some_and(|slot| slot.streaming_active),
            producer_connected: self.producer.is_some(),
            producer_identity: self.producer.as_ref().map(|slot| slot.identity.clone()),
            subscriber_count: self.subscribers.len(),
        }
    }
}

/// Central registry for the producer and all subscribers
///
/// Shared as `Arc<Registry>` by every connection task and heartbeat timer.
#[derive(Debug)]
pub struct Registry {
    /// Producer slot, subscriber set and timers
    state: Mutex<RegistryState>,

    /// Configuration
    config: RegistryConfig,

    /// Relay counters
    stats: Arc<RelayStats>,
}

impl Registry {
    /// Create a registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            config,
            stats: Arc::new(RelayStats::new()),
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Relay counters
    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// Install `conn` as the producer
    ///
    /// A different installed producer is evicted and closed first
    /// (last writer wins). Re-identification by the installed connection only
    /// restarts its heartbeat.
    pub async fn admit_producer(
        self: &Arc<Self>,
        conn: &Arc<ConnectionHandle>,
        identity: &str,
    ) -> Result<(), RegistryError> {
        let mut state = self.state.lock().await;

        if state.closing {
            return Err(RegistryError::ShuttingDown);
        }

        conn.send_text(PRODUCER_CONFIRMATION)?;

        let heartbeat = supervisor::spawn_producer_heartbeat(
            Arc::clone(self),
            Arc::clone(conn),
            self.config.heartbeat_interval,
        );

        if state.is_producer(conn.id()) {
            state.timers.insert(conn.id(), heartbeat);
            tracing::info!(
                session_id = conn.id(),
                peer = %conn.peer_addr(),
                "Producer re-identified, heartbeat restarted"
            );
            return Ok(());
        }

        if let Some(previous) = state.producer.as_ref().map(|slot| slot.conn.id()) {
            if let Some(displaced) = state.evict_producer_locked(previous, &self.stats) {
                tracing::warn!(
                    session_id = displaced.conn.id(),
                    peer = %displaced.conn.peer_addr(),
                    replacement = conn.id(),
                    "Producer replaced by newer connection"
                );
                displaced.conn.close(CLOSE_REPLACED, REPLACED_CLOSE_REASON);
            }
        }

        conn.set_role(Role::Producer);
        state.timers.insert(conn.id(), heartbeat);
        state.producer = Some(ProducerSlot::new(identity, Arc::clone(conn)));
        self.stats.record_producer();

        let notified = state.fan_out_event(
            &ServerEvent::streaming_status(true, true, STREAM_STARTED),
            &self.stats,
        );

        tracing::info!(
            session_id = conn.id(),
            peer = %conn.peer_addr(),
            identity = identity,
            subscribers = notified,
            "Producer installed"
        );

        if self.config.auto_start_on_identify {
            if let Err(e) = conn.send_text(COMMAND_LISTEN) {
                tracing::warn!(session_id = conn.id(), error = %e, "Auto-start command failed");
            }
        }

        Ok(())
    }

    /// Remove `conn` from the producer slot
    ///
    /// No-op unless `conn` is the installed producer. Returns whether it was.
    pub async fn evict_producer(&self, conn: &ConnectionHandle) -> bool {
        let mut state = self.state.lock().await;

        match state.evict_producer_locked(conn.id(), &self.stats) {
            Some(slot) => {
                tracing::info!(
                    session_id = conn.id(),
                    peer = %conn.peer_addr(),
                    identity = %slot.identity,
                    connected_secs = slot.connected_for().as_secs(),
                    subscribers = state.subscribers.len(),
                    "Producer evicted"
                );
                true
            }
            None => false,
        }
    }

    /// Admit an authenticated subscriber and send its initial status
    pub async fn admit_subscriber(
        self: &Arc<Self>,
        conn: &Arc<ConnectionHandle>,
    ) -> Result<SubscriberId, RegistryError> {
        let mut state = self.state.lock().await;

        if state.closing {
            return Err(RegistryError::ShuttingDown);
        }

        let id = SubscriberId::generate();
        let streaming = state.snapshot().streaming;
        let message = if streaming {
            STREAM_ACTIVE
        } else {
            WAITING_FOR_PRODUCER
        };

        // Count includes the newcomer
        let mut initial = self.status_event(&state, &id, Some(message));
        if let ServerEvent::Status {
            connected_clients, ..
        } = &mut initial
        {
            *connected_clients += 1;
        }
        let text = initial.encode().map_err(|e| {
            tracing::error!(error = %e, "Failed to encode initial status");
            RegistryError::Transport(SendError::Closed)
        })?;
        conn.send(Outbound::Text(text))?;

        conn.set_role(Role::Subscriber);
        let heartbeat = supervisor::spawn_subscriber_heartbeat(
            Arc::clone(self),
            id.clone(),
            self.config.heartbeat_interval,
        );
        state.timers.insert(conn.id(), heartbeat);
        state
            .subscribers
            .insert(id.clone(), SubscriberSession::new(id.clone(), Arc::clone(conn)));
        self.stats.record_subscriber();

        tracing::info!(
            client = %id,
            session_id = conn.id(),
            peer = %conn.peer_addr(),
            subscribers = state.subscribers.len(),
            "Subscriber admitted"
        );

        Ok(id)
    }

    /// Remove a subscriber; returns whether an entry was removed
    pub async fn remove_subscriber(&self, id: &SubscriberId) -> bool {
        let mut state = self.state.lock().await;

        match state.remove_subscriber_locked(id) {
            Some(session) => {
                tracing::info!(
                    client = %id,
                    session_id = session.conn.id(),
                    subscribers = state.subscribers.len(),
                    "Subscriber removed"
                );
                true
            }
            None => false,
        }
    }

    /// Send an event to every subscriber; returns the number reached
    pub async fn broadcast(&self, event: &ServerEvent) -> usize {
        let mut state = self.state.lock().await;
        state.fan_out_event(event, &self.stats)
    }

    /// Relay a producer frame to every subscriber
    ///
    /// Frames from anything other than the installed producer are dropped.
    /// Returns the number of subscribers the frame was queued for.
    pub async fn relay(&self, conn: &ConnectionHandle, frame: RelayFrame) -> usize {
        let mut state = self.state.lock().await;

        if !state.is_producer(conn.id()) {
            tracing::debug!(
                session_id = conn.id(),
                size = frame.len(),
                "Dropping frame from non-producer connection"
            );
            return 0;
        }

        if state.subscribers.is_empty() {
            self.stats.record_discard();
            return 0;
        }

        let outbound = match frame.to_outbound(self.config.relay_encoding) {
            Ok(outbound) => outbound,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build relay envelope");
                return 0;
            }
        };

        let delivered = state.fan_out(&outbound, &self.stats);
        self.stats.record_relay(frame.len(), delivered);
        delivered
    }

    /// Send a text command to the installed producer
    ///
    /// A producer whose transport is gone, or whose queue rejects the
    /// command, is evicted.
    pub async fn send_to_producer(&self, command: &str) -> Result<(), RegistryError> {
        let mut state = self.state.lock().await;

        let Some(conn) = state.producer.as_ref().map(|slot| Arc::clone(&slot.conn)) else {
            return Err(RegistryError::ProducerUnavailable);
        };

        if !conn.is_open() {
            state.evict_producer_locked(conn.id(), &self.stats);
            tracing::info!(session_id = conn.id(), "Evicted closed producer");
            return Err(RegistryError::ProducerUnavailable);
        }

        if let Err(e) = conn.send_text(command) {
            state.evict_producer_locked(conn.id(), &self.stats);
            conn.terminate();
            tracing::warn!(
                session_id = conn.id(),
                command = command,
                error = %e,
                "Command send failed, producer evicted"
            );
            return Err(RegistryError::Transport(e));
        }

        tracing::info!(session_id = conn.id(), command = command, "Command sent to producer");
        Ok(())
    }

    /// Fan out a producer status line as `esp32-status`
    ///
    /// Returns false if `conn` is not the installed producer.
    pub async fn report_producer_status(&self, conn: &ConnectionHandle, line: &str) -> bool {
        let mut state = self.state.lock().await;

        if !state.is_producer(conn.id()) {
            return false;
        }

        state.fan_out_event(&ServerEvent::producer_status(line), &self.stats);
        true
    }

    /// Record a text `pong` from the producer
    pub async fn note_producer_pong(&self, conn: &ConnectionHandle) {
        let mut state = self.state.lock().await;

        if let Some(slot) = state
            .producer
            .as_mut()
            .filter(|slot| slot.conn.id() == conn.id())
        {
            slot.last_pong_at = Some(Utc::now());
            tracing::debug!(session_id = conn.id(), "Producer pong");
        }
    }

    /// Record a protocol pong from a subscriber
    pub async fn mark_alive(&self, id: &SubscriberId) -> bool {
        let mut state = self.state.lock().await;

        match state.subscribers.get_mut(id) {
            Some(session) => {
                session.is_alive = true;
                true
            }
            None => false,
        }
    }

    /// One producer heartbeat tick
    pub async fn pulse_producer(&self, conn: &ConnectionHandle) -> Pulse {
        let mut state = self.state.lock().await;

        if !state.is_producer(conn.id()) {
            return Pulse::Stop;
        }

        let failure = if !conn.is_open() {
            Some("transport closed")
        } else if conn.send_text(PRODUCER_PING).is_err() {
            Some("ping failed")
        } else {
            None
        };

        match failure {
            Some(reason) => {
                tracing::warn!(
                    session_id = conn.id(),
                    peer = %conn.peer_addr(),
                    reason = reason,
                    "Producer heartbeat failed, evicting"
                );
                state.evict_producer_locked(conn.id(), &self.stats);
                conn.terminate();
                Pulse::Stop
            }
            None => Pulse::Continue,
        }
    }

    /// One subscriber heartbeat tick
    pub async fn pulse_subscriber(&self, id: &SubscriberId) -> Pulse {
        let mut state = self.state.lock().await;

        let Some(session) = state.subscribers.get_mut(id) else {
            return Pulse::Stop;
        };

        let failure = if !session.is_alive {
            Some("missed heartbeat")
        } else {
            session.is_alive = false;
            session.conn.send(Outbound::Ping).err().map(|_| "ping failed")
        };

        let Some(reason) = failure else {
            return Pulse::Continue;
        };

        if let Some(session) = state.remove_subscriber_locked(id) {
            session.conn.terminate();
            self.stats.record_dropped(1);
            tracing::warn!(
                client = %id,
                session_id = session.conn.id(),
                peer = %session.conn.peer_addr(),
                reason = reason,
                subscribers = state.subscribers.len(),
                "Subscriber terminated"
            );
        }

        Pulse::Stop
    }

    /// `(id, connected)` for every subscriber, oldest first
    pub async fn list_subscribers(&self) -> Vec<ClientEntry> {
        let state = self.state.lock().await;

        let mut sessions: Vec<&SubscriberSession> = state.subscribers.values().collect();
        sessions.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));
        sessions.into_iter().map(SubscriberSession::entry).collect()
    }

    /// Current streaming/connection snapshot
    pub async fn status_snapshot(&self) -> StatusSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Full `status` reply for subscriber `id`
    pub async fn status_report(&self, id: &SubscriberId) -> ServerEvent {
        let state = self.state.lock().await;
        self.status_event(&state, id, None)
    }

    fn status_event(
        &self,
        state: &RegistryState,
        id: &SubscriberId,
        message: Option<&str>,
    ) -> ServerEvent {
        let snapshot = state.snapshot();
        ServerEvent::Status {
            streaming: snapshot.streaming,
            esp32_connected: snapshot.producer_connected,
            client_id: id.to_string(),
            connected_clients: snapshot.subscriber_count,
            server_uptime: self.stats.uptime().as_secs_f64(),
            server_time: now_millis(),
            message: message.map(str::to_owned),
        }
    }

    /// Number of admitted subscribers
    pub async fn subscriber_count(&self) -> usize {
        self.state.lock().await.subscribers.len()
    }

    /// Whether a producer is installed
    pub async fn producer_connected(&self) -> bool {
        self.state.lock().await.producer.is_some()
    }

    /// Whether shutdown began
    pub async fn is_closing(&self) -> bool {
        self.state.lock().await.closing
    }

    /// Stop every heartbeat and refuse further admissions
    pub async fn stop_heartbeats(&self) -> usize {
        let mut state = self.state.lock().await;
        state.closing = true;
        state.timers.stop_all()
    }

    /// Close every subscriber and empty the set
    pub async fn drain_subscribers(&self, code: u16, reason: &str) -> usize {
        let mut state = self.state.lock().await;

        let ids: Vec<SubscriberId> = state.subscribers.keys().cloned().collect();
        for id in &ids {
            if let Some(session) = state.remove_subscriber_locked(id) {
                session.conn.close(code, reason);
            }
        }

        ids.len()
    }

    /// Send a final notice to the producer and close it
    pub async fn release_producer(&self, notice: &str, code: u16, reason: &str) -> bool {
        let mut state = self.state.lock().await;

        let Some(slot) = state.producer.take() else {
            return false;
        };
        state.timers.cancel(slot.conn.id());

        if slot.conn.is_open() {
            if let Err(e) = slot.conn.send_text(notice) {
                tracing::debug!(session_id = slot.conn.id(), error = %e, "Shutdown notice not sent");
            }
        }
        slot.conn.close(code, reason);
        slot.conn.set_role(Role::Pending);

        tracing::info!(session_id = slot.conn.id(), "Producer released");
        true
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
