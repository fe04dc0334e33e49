//! Single-producer live stream relay over WebSockets
//!
//! One producer device (for example an ESP32 microphone) connects to the
//! producer endpoint, identifies itself, and streams binary frames. Any number
//! of subscribers connect to the subscriber endpoint with a bearer token, are
//! validated against an external authority, and receive every frame plus
//! JSON status and control events. Subscribers can ask the producer to start
//! or stop streaming.
//!
//! # Architecture
//!
//! ```text
//!   producer ──ws──► ProducerConnection ──► Registry::relay() ──► subscriber queues ──► ws
//!                                              │
//!                         Supervisor timers ◄──┤ (one per connection)
//!                                              │
//!   subscriber ──ws──► AuthGate ──► SubscriberConnection ──► CommandRouter ──► Registry
//! ```
//!
//! The [`registry::Registry`] is the only owner of the producer slot and the
//! subscriber set. Every connection talks to it through a
//! [`session::ConnectionHandle`], a bounded queue drained by the connection's
//! writer task, so registry operations never wait on a socket.

pub mod auth;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod stats;
pub mod supervisor;

pub use auth::{AuthGate, Authority, HttpAuthority};
pub use error::{Error, Result};
pub use registry::{Registry, RegistryConfig};
pub use server::{RelayServer, ServerConfig};
