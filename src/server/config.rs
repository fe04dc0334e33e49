//! Server configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::protocol::constants::*;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the producer endpoint binds to
    pub producer_addr: SocketAddr,

    /// Address the subscriber endpoint binds to
    pub subscriber_addr: SocketAddr,

    /// Base URL of the token authority
    pub authority_url: String,

    /// Timeout of one token validation call
    pub auth_timeout: Duration,

    /// Maximum WebSocket message and frame size on both endpoints
    pub max_payload: usize,

    /// Text a producer must send to identify itself
    pub producer_identity: String,

    /// Outbound queue depth per subscriber; a full queue drops the subscriber
    pub subscriber_queue_capacity: usize,

    /// Outbound queue depth for the producer
    pub producer_queue_capacity: usize,

    /// Pause between the shutdown notice and closing subscribers
    pub shutdown_notice_delay: Duration,

    /// How long connection tasks may drain after the accept loops stop;
    /// whatever is left is aborted
    pub shutdown_timeout: Duration,

    /// Maximum concurrent connections across both endpoints (0 = unlimited)
    pub max_connections: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let any = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

        Self {
            producer_addr: SocketAddr::new(any, DEFAULT_PRODUCER_PORT),
            subscriber_addr: SocketAddr::new(any, DEFAULT_SUBSCRIBER_PORT),
            authority_url: "http://localhost:8000".to_owned(),
            auth_timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
            max_payload: DEFAULT_MAX_PAYLOAD,
            producer_identity: DEFAULT_PRODUCER_IDENTITY.to_owned(),
            subscriber_queue_capacity: 256,
            producer_queue_capacity: 64,
            shutdown_notice_delay: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(3),
            max_connections: 0, // Unlimited
            tcp_nodelay: true, // Important for low latency
        }
    }
}

/// Slack on top of the drain so the abort path runs before the binary gives up
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

impl ServerConfig {
    /// Upper bound on the whole shutdown sequence: the notice delay, the
    /// drain, and a grace period for aborting leftover connections
    pub fn shutdown_budget(&self) -> Duration {
        self.shutdown_notice_delay + self.shutdown_timeout + SHUTDOWN_GRACE
    }

    /// Bind both endpoints on `host` with the given ports
    pub fn with_host(host: IpAddr, producer_port: u16, subscriber_port: u16) -> Self {
        Self {
            producer_addr: SocketAddr::new(host, producer_port),
            subscriber_addr: SocketAddr::new(host, subscriber_port),
            ..Default::default()
        }
    }

    /// Set the producer endpoint address
    pub fn producer_addr(mut self, addr: SocketAddr) -> Self {
        self.producer_addr = addr;
        self
    }

    /// Set the subscriber endpoint address
    pub fn subscriber_addr(mut self, addr: SocketAddr) -> Self {
        self.subscriber_addr = addr;
        self
    }

    /// Set the authority base URL
    pub fn authority_url(mut self, url: impl Into<String>) -> Self {
        self.authority_url = url.into();
        self
    }

    /// Set the token validation timeout
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Set the maximum payload size
    pub fn max_payload(mut self, bytes: usize) -> Self {
        self.max_payload = bytes;
        self
    }

    /// Set the producer identification token
    pub fn producer_identity(mut self, identity: impl Into<String>) -> Self {
        self.producer_identity = identity.into();
        self
    }

    /// Set the per-subscriber queue depth
    pub fn subscriber_queue_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_queue_capacity = capacity.max(1);
        self
    }

    /// Set the shutdown notice delay
    pub fn shutdown_notice_delay(mut self, delay: Duration) -> Self {
        self.shutdown_notice_delay = delay;
        self
    }

    /// Set the shutdown timeout
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.producer_addr.port(), 3000);
        assert_eq!(config.subscriber_addr.port(), 3001);
        assert_eq!(config.authority_url, "http://localhost:8000");
        assert_eq!(config.auth_timeout, Duration::from_secs(5));
        assert_eq!(config.max_payload, 10 * 1024 * 1024);
        assert_eq!(config.producer_identity, "ESP32");
        assert_eq!(config.subscriber_queue_capacity, 256);
        assert_eq!(config.max_connections, 0);
        assert!(config.tcp_nodelay);
    }

    #[test]
    fn test_with_host() {
        let host: IpAddr = "127.0.0.1".parse().unwrap();
        let config = ServerConfig::with_host(host, 4000, 4001);

        assert_eq!(config.producer_addr, "127.0.0.1:4000".parse().unwrap());
        assert_eq!(config.subscriber_addr, "127.0.0.1:4001".parse().unwrap());
    }

    #[test]
    fn test_queue_capacity_floor() {
        let config = ServerConfig::default().subscriber_queue_capacity(0);

        assert_eq!(config.subscriber_queue_capacity, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let config = ServerConfig::default()
            .producer_addr(addr)
            .subscriber_addr(addr)
            .authority_url("http://auth:9000")
            .auth_timeout(Duration::from_secs(2))
            .max_payload(1024)
            .producer_identity("MIC01")
            .shutdown_notice_delay(Duration::from_millis(10))
            .shutdown_timeout(Duration::from_secs(1))
            .max_connections(50);

        assert_eq!(config.producer_addr, addr);
        assert_eq!(config.subscriber_addr, addr);
        assert_eq!(config.authority_url, "http://auth:9000");
        assert_eq!(config.auth_timeout, Duration::from_secs(2));
        assert_eq!(config.max_payload, 1024);
        assert_eq!(config.producer_identity, "MIC01");
        assert_eq!(config.shutdown_notice_delay, Duration::from_millis(10));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.max_connections, 50);
    }

    #[test]
    fn test_shutdown_budget_outlasts_drain() {
        let config = ServerConfig::default();

        assert_eq!(config.shutdown_budget(), Duration::from_millis(4100));
        assert!(config.shutdown_budget() > config.shutdown_notice_delay + config.shutdown_timeout);

        let config = config
            .shutdown_notice_delay(Duration::ZERO)
            .shutdown_timeout(Duration::ZERO);
        assert_eq!(config.shutdown_budget(), SHUTDOWN_GRACE);
    }
}
