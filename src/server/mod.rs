//! Relay server
//!
//! - [`config`]: endpoint addresses, limits and timeouts
//! - [`listener`]: accept loops and connection task supervision
//! - [`connection`]: per-connection reader and writer tasks
//! - [`lifecycle`]: graceful shutdown

pub mod config;
mod connection;
pub mod lifecycle;
pub mod listener;

pub use config::ServerConfig;
pub use lifecycle::{Lifecycle, ShutdownReport};
pub use listener::RelayServer;
