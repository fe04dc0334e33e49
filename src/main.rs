//! stream-relay binary
//!
//! Every option can be given as a flag or through the environment:
//!
//! ```text
//! PRODUCER_PORT=3000 SUBSCRIBER_PORT=3001 AUTHORITY_URL=http://localhost:8000 stream-relay
//! stream-relay --heartbeat-interval-secs 10 --relay-encoding base64
//! ```
//!
//! Producers connect to `ws://host:PRODUCER_PORT/` and identify with
//! `PRODUCER_IDENTITY`. Subscribers connect to
//! `ws://host:SUBSCRIBER_PORT/?token=...`.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::task::JoinError;

use stream_relay::protocol::constants::*;
use stream_relay::registry::RelayEncoding;
use stream_relay::{HttpAuthority, RegistryConfig, RelayServer, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "stream-relay")]
#[command(about = "Relay one producer's binary stream to authenticated WebSocket subscribers", long_about = None)]
struct Cli {
    /// Interface both endpoints bind to
    #[arg(long, env = "BIND_HOST", default_value = "0.0.0.0")]
    bind_host: IpAddr,

    /// Producer endpoint port
    #[arg(long, env = "PRODUCER_PORT", default_value_t = DEFAULT_PRODUCER_PORT)]
    producer_port: u16,

    /// Subscriber endpoint port
    #[arg(long, env = "SUBSCRIBER_PORT", default_value_t = DEFAULT_SUBSCRIBER_PORT)]
    subscriber_port: u16,

    /// Base URL of the token validation service
    #[arg(long, env = "AUTHORITY_URL", default_value = "http://localhost:8000")]
    authority_url: String,

    /// Token validation timeout in seconds
    #[arg(long, env = "AUTH_TIMEOUT_SECS", default_value_t = DEFAULT_AUTH_TIMEOUT_SECS)]
    auth_timeout_secs: u64,

    /// Heartbeat interval in seconds (producer and subscribers)
    #[arg(long, env = "HEARTBEAT_INTERVAL_SECS", default_value_t = DEFAULT_HEARTBEAT_SECS)]
    heartbeat_interval_secs: u64,

    /// Maximum WebSocket message size in bytes
    #[arg(long, env = "MAX_PAYLOAD", default_value_t = DEFAULT_MAX_PAYLOAD)]
    max_payload: usize,

    /// Text the producer sends to identify itself
    #[arg(long, env = "PRODUCER_IDENTITY", default_value = DEFAULT_PRODUCER_IDENTITY)]
    producer_identity: String,

    /// How frames reach subscribers: `binary` or `base64`
    #[arg(long, env = "RELAY_ENCODING", default_value = "binary")]
    relay_encoding: RelayEncoding,

    /// Send `Listen` to the producer as soon as it identifies
    #[arg(long, env = "AUTO_START_ON_IDENTIFY")]
    auto_start_on_identify: bool,

    /// Maximum concurrent connections (0 = unlimited)
    #[arg(long, env = "MAX_CONNECTIONS", default_value_t = 0)]
    max_connections: usize,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig::with_host(self.bind_host, self.producer_port, self.subscriber_port)
            .authority_url(self.authority_url.clone())
            .auth_timeout(Duration::from_secs(self.auth_timeout_secs))
            .max_payload(self.max_payload)
            .producer_identity(self.producer_identity.clone())
            .max_connections(self.max_connections)
    }

    fn registry_config(&self) -> RegistryConfig {
        RegistryConfig::default()
            .heartbeat_interval(Duration::from_secs(self.heartbeat_interval_secs))
            .relay_encoding(self.relay_encoding)
            .auto_start_on_identify(self.auto_start_on_identify)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("stream_relay=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.server_config();
    let registry_config = cli.registry_config();

    tracing::info!(
        producer_addr = %config.producer_addr,
        subscriber_addr = %config.subscriber_addr,
        authority_url = %config.authority_url,
        auth_timeout_secs = config.auth_timeout.as_secs(),
        heartbeat_interval_secs = registry_config.heartbeat_interval.as_secs(),
        max_payload = config.max_payload,
        producer_identity = %config.producer_identity,
        relay_encoding = ?registry_config.relay_encoding,
        auto_start_on_identify = registry_config.auto_start_on_identify,
        max_connections = config.max_connections,
        "Starting stream relay"
    );

    let authority = HttpAuthority::new(&config.authority_url, config.auth_timeout)
        .context("failed to build authority client")?;
    let shutdown_budget = config.shutdown_budget();
    let server = Arc::new(RelayServer::with_registry_config(
        config,
        authority,
        registry_config,
    ));

    let mut serving = tokio::spawn(Arc::clone(&server).run());

    let (mut failure, serving_joined) = tokio::select! {
        joined = &mut serving => (serving_failure(joined), true),
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received");
            (None, false)
        }
    };

    let graceful = tokio::time::timeout(shutdown_budget, async {
        server.shutdown().await;
        if !serving_joined {
            failure = serving_failure((&mut serving).await);
        }
    })
    .await;

    if graceful.is_err() {
        tracing::warn!(
            timeout_ms = shutdown_budget.as_millis() as u64,
            "Shutdown timed out, exiting anyway"
        );
    }

    match failure {
        Some(e) => {
            tracing::error!(error = %e, "Exiting after failure");
            Err(e)
        }
        None => Ok(()),
    }
}

/// Turn the serving task's outcome into the failure the process exits with
fn serving_failure(
    joined: std::result::Result<stream_relay::Result<()>, JoinError>,
) -> Option<anyhow::Error> {
    let failure = match joined {
        Ok(Ok(())) => return None,
        Ok(Err(e)) => anyhow::Error::from(e),
        Err(e) => anyhow::anyhow!("server task failed: {}", e),
    };

    tracing::error!(error = %failure, "Relay server failed");
    Some(failure)
}
