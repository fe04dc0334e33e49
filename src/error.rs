//! Crate-level error type

use crate::registry::RegistryError;

/// Errors surfaced by the relay server
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket or listener failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket handshake or framing failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP client construction failure
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Registry rejected an operation
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// A connection task panicked; the process is no longer trusted
    #[error("Connection task panicked: {0}")]
    TaskPanicked(String),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
