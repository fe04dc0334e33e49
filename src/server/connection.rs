//! Connection handling
//!
//! Each accepted socket runs one reader loop (this task) and one writer task.
//! The writer drains the connection's [`Outbound`] queue into the WebSocket
//! sink; the registry and the router only ever enqueue.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use crate::auth::{token_from_query, AuthGate, Authority};
use crate::error::Result;
use crate::protocol::constants::*;
use crate::protocol::ProducerMessage;
use crate::registry::{Registry, RegistryError, RelayFrame, SubscriberId};
use crate::router::CommandRouter;
use crate::server::config::ServerConfig;
use crate::session::{ConnectionHandle, ConnectionId, Outbound, Role};

/// How long a finished reader waits for its writer to flush
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

impl From<Outbound> for Message {
    fn from(frame: Outbound) -> Self {
        match frame {
            Outbound::Text(text) => Message::Text(text.as_ref().into()),
            Outbound::Binary(data) => Message::Binary(data),
            Outbound::Ping => Message::Ping(Bytes::new()),
            Outbound::Close { code, reason } => Message::Close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: reason.into(),
            })),
        }
    }
}

/// WebSocket limits shared by both endpoints
pub(crate) fn websocket_config(max_payload: usize) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_payload);
    config.max_frame_size = Some(max_payload);
    config
}

/// Drain `rx` into `sink` until the queue closes, a close frame is written,
/// or the connection is cancelled
async fn write_loop<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
    session_id: ConnectionId,
) where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let closing = matches!(frame, Outbound::Close { .. });
        if let Err(e) = sink.send(Message::from(frame)).await {
            tracing::debug!(session_id = session_id, error = %e, "Write failed");
            break;
        }
        if closing {
            break;
        }
    }

    // Stops the reader too; dropping the sink drops the transport
    cancel.cancel();
}

/// Close politely, give the writer a moment, then drop the transport
async fn finish(handle: &ConnectionHandle, writer: JoinHandle<()>, code: u16, reason: &str) {
    handle.close(code, reason);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        tracing::debug!(session_id = handle.id(), "Writer did not drain in time");
    }
    handle.terminate();
}

/// Producer endpoint connection
pub(crate) struct ProducerConnection {
    session_id: ConnectionId,
    peer_addr: SocketAddr,
    registry: Arc<Registry>,
    identity: String,
    queue_capacity: usize,
    max_payload: usize,
}

impl ProducerConnection {
    pub(crate) fn new(
        session_id: ConnectionId,
        peer_addr: SocketAddr,
        config: &ServerConfig,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            session_id,
            peer_addr,
            registry,
            identity: config.producer_identity.clone(),
            queue_capacity: config.producer_queue_capacity,
            max_payload: config.max_payload,
        }
    }

    pub(crate) async fn run(self, socket: TcpStream) -> Result<()> {
        let ws = tokio_tungstenite::accept_async_with_config(
            socket,
            Some(websocket_config(self.max_payload)),
        )
        .await?;

        tracing::info!(
            session_id = self.session_id,
            peer = %self.peer_addr,
            "Producer endpoint connection"
        );

        let (sink, mut stream) = ws.split();
        let (handle, rx) = ConnectionHandle::new(
            self.session_id,
            self.peer_addr,
            Role::Pending,
            self.queue_capacity,
        );
        let handle = Arc::new(handle);
        let cancel = handle.cancellation();
        let writer = tokio::spawn(write_loop(sink, rx, cancel.clone(), self.session_id));

        let result = loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                message = stream.next() => message,
            };

            match message {
                None => break Ok(()),
                Some(Err(e)) => break Err(e.into()),
                Some(Ok(Message::Binary(data))) => {
                    self.registry.relay(&handle, RelayFrame::new(data)).await;
                }
                Some(Ok(Message::Text(text))) => self.on_text(&handle, text.as_str()).await,
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(session_id = self.session_id, frame = ?frame, "Producer sent close");
                    break Ok(());
                }
                // Protocol pings are answered by tungstenite
                Some(Ok(_)) => {}
            }
        };

        if self.registry.evict_producer(&handle).await {
            tracing::info!(
                session_id = self.session_id,
                peer = %self.peer_addr,
                "Producer disconnected"
            );
        }
        finish(&handle, writer, 1000, "").await;

        result
    }

    async fn on_text(&self, handle: &Arc<ConnectionHandle>, text: &str) {
        match ProducerMessage::parse(text, &self.identity) {
            ProducerMessage::Identify => {
                match self.registry.admit_producer(handle, &self.identity).await {
                    Ok(()) => {}
                    Err(RegistryError::ShuttingDown) => {
                        handle.close(CLOSE_GOING_AWAY, SHUTDOWN_CLOSE_REASON);
                    }
                    Err(e) => {
                        tracing::warn!(
                            session_id = self.session_id,
                            peer = %self.peer_addr,
                            error = %e,
                            "Producer identification failed"
                        );
                        handle.terminate();
                    }
                }
            }
            ProducerMessage::Pong => self.registry.note_producer_pong(handle).await,
            ProducerMessage::Status(line) => {
                if !self.registry.report_producer_status(handle, line).await {
                    tracing::debug!(
                        session_id = self.session_id,
                        "Status line from unidentified connection dropped"
                    );
                }
            }
            ProducerMessage::Unrecognized(line) => {
                tracing::debug!(
                    session_id = self.session_id,
                    text = line,
                    "Unrecognized producer text dropped"
                );
            }
        }
    }
}

/// Subscriber endpoint connection
pub(crate) struct SubscriberConnection<A: Authority> {
    session_id: ConnectionId,
    peer_addr: SocketAddr,
    registry: Arc<Registry>,
    gate: Arc<AuthGate<A>>,
    router: CommandRouter,
    queue_capacity: usize,
    max_payload: usize,
}

impl<A: Authority> SubscriberConnection<A> {
    pub(crate) fn new(
        session_id: ConnectionId,
        peer_addr: SocketAddr,
        config: &ServerConfig,
        registry: Arc<Registry>,
        gate: Arc<AuthGate<A>>,
        router: CommandRouter,
    ) -> Self {
        Self {
            session_id,
            peer_addr,
            registry,
            gate,
            router,
            queue_capacity: config.subscriber_queue_capacity,
            max_payload: config.max_payload,
        }
    }

    pub(crate) async fn run(self, socket: TcpStream) -> Result<()> {
        let mut query = None;
        let capture_query = |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
            query = request.uri().query().map(str::to_owned);
            Ok(response)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async_with_config(
            socket,
            capture_query,
            Some(websocket_config(self.max_payload)),
        )
        .await?;

        let token = token_from_query(query.as_deref());
        if let Err(failure) = self.gate.check(token.as_deref()).await {
            tracing::warn!(
                session_id = self.session_id,
                peer = %self.peer_addr,
                reason = failure.reason(),
                "Subscriber rejected"
            );
            let frame = CloseFrame {
                code: CloseCode::from(CLOSE_POLICY_VIOLATION),
                reason: failure.reason().into(),
            };
            if let Err(e) = ws.close(Some(frame)).await {
                tracing::debug!(session_id = self.session_id, error = %e, "Close after rejection failed");
            }
            return Ok(());
        }

        let (sink, mut stream) = ws.split();
        let (handle, rx) = ConnectionHandle::new(
            self.session_id,
            self.peer_addr,
            Role::Pending,
            self.queue_capacity,
        );
        let handle = Arc::new(handle);
        let cancel = handle.cancellation();
        let writer = tokio::spawn(write_loop(sink, rx, cancel.clone(), self.session_id));

        let id = match self.registry.admit_subscriber(&handle).await {
            Ok(id) => id,
            Err(e) => {
                let (code, reason) = match e {
                    RegistryError::ShuttingDown => (CLOSE_GOING_AWAY, SHUTDOWN_CLOSE_REASON),
                    _ => (CLOSE_INTERNAL_ERROR, SETUP_ERROR_REASON),
                };
                tracing::warn!(
                    session_id = self.session_id,
                    peer = %self.peer_addr,
                    error = %e,
                    "Subscriber admission failed"
                );
                finish(&handle, writer, code, reason).await;
                return Ok(());
            }
        };

        let result = self.read_loop(&id, &handle, &cancel, &mut stream).await;

        if self.registry.remove_subscriber(&id).await {
            tracing::info!(
                client = %id,
                session_id = self.session_id,
                peer = %self.peer_addr,
                "Subscriber disconnected"
            );
        }
        finish(&handle, writer, 1000, "").await;

        result
    }

    async fn read_loop<S>(
        &self,
        id: &SubscriberId,
        handle: &ConnectionHandle,
        cancel: &CancellationToken,
        stream: &mut S,
    ) -> Result<()>
    where
        S: futures_util::Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
    {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                message = stream.next() => message,
            };

            match message {
                None => return Ok(()),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = self.router.dispatch(id, handle, text.as_str()).await {
                        tracing::debug!(client = %id, error = %e, "Reply not queued, dropping subscriber");
                        return Ok(());
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    self.registry.mark_alive(id).await;
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!(client = %id, size = data.len(), "Ignoring binary frame from subscriber");
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(client = %id, frame = ?frame, "Subscriber sent close");
                    return Ok(());
                }
                Some(Ok(_)) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_to_message() {
        assert_eq!(
            Message::from(Outbound::text("hello")),
            Message::Text("hello".into())
        );
        assert_eq!(
            Message::from(Outbound::Binary(Bytes::from_static(&[1, 2]))),
            Message::Binary(Bytes::from_static(&[1, 2]))
        );
        assert!(matches!(Message::from(Outbound::Ping), Message::Ping(_)));

        match Message::from(Outbound::Close {
            code: CLOSE_POLICY_VIOLATION,
            reason: "Invalid authentication token".into(),
        }) {
            Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 1008);
                assert_eq!(frame.reason.as_str(), "Invalid authentication token");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_websocket_config_limits() {
        let config = websocket_config(1024);

        assert_eq!(config.max_message_size, Some(1024));
        assert_eq!(config.max_frame_size, Some(1024));
    }
}
