//! Registry error types
//!
//! Error types for connection registry operations.

use crate::session::SendError;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Shutdown has begun; no new sessions are admitted
    ShuttingDown,
    /// No open producer is installed
    ProducerUnavailable,
    /// The target connection could not take the frame
    Transport(SendError),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::ShuttingDown => write!(f, "Registry is shutting down"),
            RegistryError::ProducerUnavailable => write!(f, "ESP32 not connected"),
            RegistryError::Transport(e) => write!(f, "Transport failure: {}", e),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<SendError> for RegistryError {
    fn from(e: SendError) -> Self {
        RegistryError::Transport(e)
    }
}
