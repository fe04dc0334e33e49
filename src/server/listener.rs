//! Relay server listeners
//!
//! Runs the producer and subscriber accept loops and spawns a connection
//! task per socket. Connection tasks live in a `JoinSet`; a panic in any of
//! them ends the server with [`Error::TaskPanicked`].

use std::any::Any;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use crate::auth::{AuthGate, Authority};
use crate::error::{Error, Result};
use crate::registry::{Registry, RegistryConfig};
use crate::router::CommandRouter;
use crate::server::config::ServerConfig;
use crate::server::connection::{ProducerConnection, SubscriberConnection};
use crate::server::lifecycle::{Lifecycle, ShutdownReport};

/// Which endpoint a socket arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Producer,
    Subscriber,
}

impl Endpoint {
    fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Producer => "producer",
            Endpoint::Subscriber => "subscriber",
        }
    }
}

/// Relay server
pub struct RelayServer<A: Authority> {
    config: ServerConfig,
    registry: Arc<Registry>,
    gate: Arc<AuthGate<A>>,
    router: CommandRouter,
    lifecycle: Lifecycle,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl<A: Authority> RelayServer<A> {
    /// Create a new server with the given configuration and authority
    pub fn new(config: ServerConfig, authority: A) -> Self {
        Self::with_registry_config(config, authority, RegistryConfig::default())
    }

    /// Create a new server with custom registry configuration
    pub fn with_registry_config(
        config: ServerConfig,
        authority: A,
        registry_config: RegistryConfig,
    ) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        let registry = Arc::new(Registry::with_config(registry_config));

        Self {
            router: CommandRouter::new(Arc::clone(&registry)),
            lifecycle: Lifecycle::new(Arc::clone(&registry), config.shutdown_notice_delay),
            gate: Arc::new(AuthGate::new(authority)),
            registry,
            config,
            next_session_id: AtomicU64::new(1),
            connection_semaphore,
        }
    }

    /// Get a reference to the registry
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind both endpoints and serve until shutdown
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let producer = TcpListener::bind(self.config.producer_addr).await?;
        let subscriber = TcpListener::bind(self.config.subscriber_addr).await?;

        self.serve(producer, subscriber).await
    }

    /// Serve on already-bound listeners until shutdown
    pub async fn serve(self: Arc<Self>, producer: TcpListener, subscriber: TcpListener) -> Result<()> {
        tracing::info!(
            producer_addr = %producer.local_addr()?,
            subscriber_addr = %subscriber.local_addr()?,
            "Relay server listening"
        );

        let shutdown = self.lifecycle.listener_token();
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = producer.accept() => {
                    self.on_accept(&mut tasks, Endpoint::Producer, accepted);
                }
                accepted = subscriber.accept() => {
                    self.on_accept(&mut tasks, Endpoint::Subscriber, accepted);
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            let message = panic_message(e.into_panic());
                            tracing::error!(panic = %message, "Connection task panicked");
                            return Err(Error::TaskPanicked(message));
                        }
                    }
                }
            }
        }

        tracing::info!(connections = tasks.len(), "Accept loops stopped, draining connections");

        let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    if e.is_panic() {
                        return Err(Error::TaskPanicked(panic_message(e.into_panic())));
                    }
                }
            }
            Ok(())
        })
        .await;

        match drained {
            Ok(result) => result,
            Err(_) => {
                // Connections that never reached the registry are not closed by shutdown
                tracing::warn!(remaining = tasks.len(), "Aborting remaining connections");
                tasks.shutdown().await;
                Ok(())
            }
        }
    }

    /// Run the shutdown sequence (idempotent)
    pub async fn shutdown(&self) -> Option<ShutdownReport> {
        self.lifecycle.shutdown().await
    }

    fn on_accept(
        self: &Arc<Self>,
        tasks: &mut JoinSet<()>,
        endpoint: Endpoint,
        accepted: std::io::Result<(TcpStream, SocketAddr)>,
    ) {
        match accepted {
            Ok((socket, peer_addr)) => self.handle_connection(tasks, endpoint, socket, peer_addr),
            Err(e) => {
                tracing::error!(endpoint = endpoint.as_str(), error = %e, "Failed to accept connection");
            }
        }
    }

    fn handle_connection(
        self: &Arc<Self>,
        tasks: &mut JoinSet<()>,
        endpoint: Endpoint,
        socket: TcpStream,
        peer_addr: SocketAddr,
    ) {
        // Check connection limit
        let permit: Option<OwnedSemaphorePermit> = match self.connection_semaphore {
            Some(ref sem) => match Arc::clone(sem).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(
                        endpoint = endpoint.as_str(),
                        peer = %peer_addr,
                        "Connection rejected: limit reached"
                    );
                    return;
                }
            },
            None => None,
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            session_id = session_id,
            endpoint = endpoint.as_str(),
            peer = %peer_addr,
            "New connection"
        );

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(session_id = session_id, error = %e, "Failed to configure socket");
            return;
        }

        let server = Arc::clone(self);
        tasks.spawn(async move {
            let _permit = permit;

            let result = match endpoint {
                Endpoint::Producer => {
                    ProducerConnection::new(
                        session_id,
                        peer_addr,
                        &server.config,
                        Arc::clone(&server.registry),
                    )
                    .run(socket)
                    .await
                }
                Endpoint::Subscriber => {
                    SubscriberConnection::new(
                        session_id,
                        peer_addr,
                        &server.config,
                        Arc::clone(&server.registry),
                        Arc::clone(&server.gate),
                        server.router.clone(),
                    )
                    .run(socket)
                    .await
                }
            };

            if let Err(e) = result {
                tracing::debug!(
                    session_id = session_id,
                    endpoint = endpoint.as_str(),
                    peer = %peer_addr,
                    error = %e,
                    "Connection error"
                );
            }

            tracing::debug!(session_id = session_id, "Connection closed");
        });
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }

        Ok(())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
