//! Producer slot and subscriber session types
//!
//! This module defines the per-connection state stored in the registry.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::frame::SubscriberId;
use crate::protocol::ClientEntry;
use crate::session::ConnectionHandle;

/// The single installed producer
#[derive(Debug)]
pub struct ProducerSlot {
    /// Identification token the producer sent
    pub identity: String,

    /// Connection the producer is using
    pub conn: Arc<ConnectionHandle>,

    /// Whether the producer is considered to be streaming
    pub streaming_active: bool,

    /// Last textual `pong` seen from the producer (observed, not enforced)
    pub last_pong_at: Option<DateTime<Utc>>,

    /// When the producer was installed
    pub admitted_at: DateTime<Utc>,
}

impl ProducerSlot {
    pub(super) fn new(identity: &str, conn: Arc<ConnectionHandle>) -> Self {
        Self {
            identity: identity.to_owned(),
            conn,
            streaming_active: true,
            last_pong_at: None,
            admitted_at: Utc::now(),
        }
    }

    /// How long the producer has been installed
    pub fn connected_for(&self) -> std::time::Duration {
        (Utc::now() - self.admitted_at).to_std().unwrap_or_default()
    }
}

/// One authenticated subscriber
#[derive(Debug)]
pub struct SubscriberSession {
    /// Server-generated id
    pub id: SubscriberId,

    /// Connection the subscriber is using
    pub conn: Arc<ConnectionHandle>,

    /// Always true for sessions in the registry; admission happens only
    /// after the authority accepted the token
    pub authenticated: bool,

    /// Cleared before each heartbeat ping, set again by the pong
    pub is_alive: bool,

    /// When the subscriber was admitted
    pub joined_at: DateTime<Utc>,
}

impl SubscriberSession {
    pub(super) fn new(id: SubscriberId, conn: Arc<ConnectionHandle>) -> Self {
        Self {
            id,
            conn,
            authenticated: true,
            is_alive: true,
            joined_at: Utc::now(),
        }
    }

    /// Row for a `client-list` reply
    pub fn entry(&self) -> ClientEntry {
        ClientEntry {
            id: self.id.to_string(),
            connected: self.conn.is_open(),
        }
    }
}

/// Streaming/connection snapshot used in `status` replies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Whether an installed producer is streaming
    pub streaming: bool,
    /// Whether a producer is installed
    pub producer_connected: bool,
    /// Identity of the installed producer
    pub producer_identity: Option<String>,
    /// Number of admitted subscribers
    pub subscriber_count: usize,
}
