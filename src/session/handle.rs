//! Connection handles
//!
//! A [`ConnectionHandle`] is the registry's view of one WebSocket connection.
//! It carries the connection id, an explicit [`Role`], and the sending half of
//! a bounded queue drained by the connection's writer task. Sending never
//! waits: a full queue is reported as a failure so a slow peer is dropped
//! instead of stalling the relay.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Server-assigned connection id, unique per process
pub type ConnectionId = u64;

/// What a connection is to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepted but not yet identified or admitted
    Pending,
    /// The installed producer
    Producer,
    /// An admitted subscriber
    Subscriber,
}

/// A frame queued for the writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// UTF-8 text frame (shared between broadcast recipients)
    Text(Arc<str>),
    /// Binary frame (reference counted, never copied)
    Binary(Bytes),
    /// Protocol-level ping
    Ping,
    /// Close handshake; the writer stops after sending it
    Close { code: u16, reason: String },
}

impl Outbound {
    /// Text frame from anything string-like
    pub fn text(text: impl Into<Arc<str>>) -> Self {
        Self::Text(text.into())
    }
}

/// Why a frame could not be queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The connection was closed or terminated
    #[error("connection closed")]
    Closed,
    /// The outbound queue is full (peer too slow)
    #[error("outbound queue full")]
    Full,
}

/// Registry-side handle to a live connection
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Connection id
    id: ConnectionId,

    /// Remote peer address
    peer_addr: SocketAddr,

    /// Current role
    role: Mutex<Role>,

    /// Queue feeding the writer task
    tx: mpsc::Sender<Outbound>,

    /// Cleared by `close` and `terminate`
    open: AtomicBool,

    /// Cancels both the reader and the writer task
    cancel: CancellationToken,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer task drains
    pub fn new(
        id: ConnectionId,
        peer_addr: SocketAddr,
        role: Role,
        queue_capacity: usize,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));

        let handle = Self {
            id,
            peer_addr,
            role: Mutex::new(role),
            tx,
            open: AtomicBool::new(true),
            cancel: CancellationToken::new(),
        };

        (handle, rx)
    }

    /// Connection id
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Current role
    pub fn role(&self) -> Role {
        *self.role.lock()
    }

    /// Change role (on identification or admission)
    pub fn set_role(&self, role: Role) {
        *self.role.lock() = role;
    }

    /// Whether frames can still be queued
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Queue a frame without waiting
    pub fn send(&self, frame: Outbound) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }

        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Queue a text frame
    pub fn send_text(&self, text: impl Into<Arc<str>>) -> Result<(), SendError> {
        self.send(Outbound::text(text))
    }

    /// Start a close handshake with the given code
    ///
    /// Frames already queued are written first. If the queue is full the
    /// connection is terminated instead. Calling this more than once has no
    /// further effect.
    pub fn close(&self, code: u16, reason: &str) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }

        let frame = Outbound::Close {
            code,
            reason: reason.to_owned(),
        };
        if self.tx.try_send(frame).is_err() {
            self.cancel.cancel();
        }
    }

    /// Drop the transport without a close handshake
    pub fn terminate(&self) {
        self.open.store(false, Ordering::Release);
        self.cancel.cancel();
    }

    /// Token cancelled when the connection must stop
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
