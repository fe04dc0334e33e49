//! Wire constants shared by both endpoints

/// Default text a producer sends to identify itself
pub const DEFAULT_PRODUCER_IDENTITY: &str = "ESP32";

/// Reply sent to a producer once it is installed
pub const PRODUCER_CONFIRMATION: &str = "Connected to Server";

/// Heartbeat text sent to the producer
pub const PRODUCER_PING: &str = "ping";

/// Optional heartbeat reply from the producer
pub const PRODUCER_PONG: &str = "pong";

/// Prefix of producer status report lines
pub const PRODUCER_STATUS_PREFIX: &str = "STATUS:";

/// Final notice sent to the producer before shutdown
pub const PRODUCER_SHUTDOWN_NOTICE: &str = "Server shutting down";

/// Command asking the producer to start streaming
pub const COMMAND_LISTEN: &str = "Listen";

/// Command asking the producer to stop streaming
pub const COMMAND_STOP: &str = "Stop";

// Close codes (RFC 6455 section 7.4.1, plus one private-use code)

/// Endpoint is going away (server shutdown)
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Policy violation (missing or invalid token)
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Unexpected condition while setting up the session
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Producer displaced by a newer identification
pub const CLOSE_REPLACED: u16 = 4000;

/// Close reason sent to subscribers on shutdown
pub const SHUTDOWN_CLOSE_REASON: &str = "Server shutdown";

/// Close reason sent to a displaced producer
pub const REPLACED_CLOSE_REASON: &str = "Replaced by newer producer connection";

/// Close reason for setup failures
pub const SETUP_ERROR_REASON: &str = "Server error during authentication";

// Endpoint defaults

/// Default producer endpoint port
pub const DEFAULT_PRODUCER_PORT: u16 = 3000;

/// Default subscriber endpoint port
pub const DEFAULT_SUBSCRIBER_PORT: u16 = 3001;

/// Default maximum WebSocket message size (10 MiB)
pub const DEFAULT_MAX_PAYLOAD: usize = 10 * 1024 * 1024;

/// Default heartbeat interval in seconds
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;

/// Default authority request timeout in seconds
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 5;

/// Path of the token validation endpoint on the authority
pub const VALIDATE_TOKEN_PATH: &str = "/api/v1/audio/validate-token";
