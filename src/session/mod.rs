//! Per-connection state shared with the registry

pub mod handle;

pub use handle::{ConnectionHandle, ConnectionId, Outbound, Role, SendError};
