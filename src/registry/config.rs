//! Registry configuration

use std::time::Duration;

use super::frame::RelayEncoding;
use crate::protocol::constants::DEFAULT_HEARTBEAT_SECS;

/// Shortest heartbeat interval the supervisor will run
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for the connection registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Interval of both heartbeat regimes (producer text ping, subscriber
    /// protocol ping). Never shorter than [`MIN_HEARTBEAT_INTERVAL`] once
    /// the supervisor uses it.
    pub heartbeat_interval: Duration,

    /// How relayed frames are presented to subscribers
    pub relay_encoding: RelayEncoding,

    /// Send `Listen` to a producer as soon as it identifies, instead of
    /// waiting for a subscriber to ask
    pub auto_start_on_identify: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            relay_encoding: RelayEncoding::Binary,
            auto_start_on_identify: false,
        }
    }
}

impl RegistryConfig {
    /// Set the heartbeat interval (clamped to [`MIN_HEARTBEAT_INTERVAL`])
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(MIN_HEARTBEAT_INTERVAL);
        self
    }

    /// Set the relay encoding
    pub fn relay_encoding(mut self, encoding: RelayEncoding) -> Self {
        self.relay_encoding = encoding;
        self
    }

    /// Start the producer on identification
    pub fn auto_start_on_identify(mut self, enabled: bool) -> Self {
        self.auto_start_on_identify = enabled;
        self
    }
}
