//! Subscriber command routing
//!
//! Text frames from a subscriber are parsed as [`ClientRequest`]s and
//! dispatched: replies go back to the caller only, producer commands are
//! forwarded through the registry and announced to everyone.

use std::sync::Arc;

use crate::protocol::constants::{COMMAND_LISTEN, COMMAND_STOP};
use crate::protocol::{ClientRequest, ServerEvent};
use crate::registry::{Registry, RegistryError, SubscriberId};
use crate::session::{ConnectionHandle, Outbound, SendError};

const PRODUCER_NOT_AVAILABLE: &str = "ESP32 not available";

/// Dispatches subscriber requests
#[derive(Debug, Clone)]
pub struct CommandRouter {
    registry: Arc<Registry>,
}

impl CommandRouter {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Handle one text frame from subscriber `id`
    ///
    /// The error only reports that a reply could not be queued on `conn`.
    pub async fn dispatch(
        &self,
        id: &SubscriberId,
        conn: &ConnectionHandle,
        text: &str,
    ) -> Result<(), SendError> {
        let request = match ClientRequest::parse(text) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(client = %id, error = %e, "Rejected subscriber message");
                return reply(conn, &ServerEvent::error(e.to_string()));
            }
        };

        tracing::debug!(client = %id, request = request.kind(), "Subscriber request");

        match request {
            ClientRequest::Ping { id: echo } => {
                reply(conn, &ServerEvent::pong(id.as_str(), echo))
            }
            ClientRequest::StartListening => self.forward(id, conn, COMMAND_LISTEN).await,
            ClientRequest::StopListening => self.forward(id, conn, COMMAND_STOP).await,
            ClientRequest::GetStatus => reply(conn, &self.registry.status_report(id).await),
            ClientRequest::GetClients => {
                let clients = self.registry.list_subscribers().await;
                reply(conn, &ServerEvent::client_list(clients))
            }
        }
    }

    async fn forward(
        &self,
        id: &SubscriberId,
        conn: &ConnectionHandle,
        command: &str,
    ) -> Result<(), SendError> {
        match self.registry.send_to_producer(command).await {
            Ok(()) => {
                self.registry
                    .broadcast(&ServerEvent::command_sent(command))
                    .await;
                tracing::info!(client = %id, command = command, "Producer command forwarded");
                Ok(())
            }
            Err(e) => {
                tracing::info!(client = %id, command = command, error = %e, "Producer command not delivered");
                let result = reply(
                    conn,
                    &ServerEvent::error(RegistryError::ProducerUnavailable.to_string()),
                );
                self.registry
                    .broadcast(&ServerEvent::streaming_status(
                        false,
                        false,
                        PRODUCER_NOT_AVAILABLE,
                    ))
                    .await;
                result
            }
        }
    }
}

/// Queue `event` on `conn` only
fn reply(conn: &ConnectionHandle, event: &ServerEvent) -> Result<(), SendError> {
    match event.encode() {
        Ok(text) => conn.send(Outbound::Text(text)),
        Err(e) => {
            tracing::error!(event = event.kind(), error = %e, "Failed to encode reply");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use serde_json::Value;
    use tokio::sync::mpsc;

    use super::*;
    use crate::session::Role;

    fn conn(id: u64) -> (Arc<ConnectionHandle>, mpsc::Receiver<Outbound>) {
        let addr = SocketAddr::from(([127, 0, 0, 1], 41000 + id as u16));
        let (handle, rx) = ConnectionHandle::new(id, addr, Role::Pending, 64);
        (Arc::new(handle), rx)
    }

    fn events(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Value> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Outbound::Text(text) = frame {
                events.push(serde_json::from_str(&text).unwrap());
            }
        }
        events
    }

    fn texts(rx: &mut mpsc::Receiver<Outbound>) -> Vec<String> {
        let mut texts = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Outbound::Text(text) = frame {
                texts.push(text.to_string());
            }
        }
        texts
    }

    async fn setup() -> (
        Arc<Registry>,
        CommandRouter,
        SubscriberId,
        Arc<ConnectionHandle>,
        mpsc::Receiver<Outbound>,
    ) {
        let registry = Arc::new(Registry::new());
        let router = CommandRouter::new(Arc::clone(&registry));
        let (sub, mut rx) = conn(1);
        let id = registry.admit_subscriber(&sub).await.unwrap();
        events(&mut rx);
        (registry, router, id, sub, rx)
    }

    #[tokio::test]
    async fn test_unknown_type_replies_with_error() {
        let (registry, router, id, sub, mut rx) = setup().await;
        let before = registry.status_snapshot().await;

        router
            .dispatch(&id, &sub, r#"{"type":"unknown-xyz"}"#)
            .await
            .unwrap();

        let replies = events(&mut rx);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["type"], "error");
        assert_eq!(replies[0]["message"], "Unknown message type: unknown-xyz");
        assert_eq!(registry.status_snapshot().await, before);
    }

    #[tokio::test]
    async fn test_malformed_messages() {
        let (_registry, router, id, sub, mut rx) = setup().await;

        router.dispatch(&id, &sub, "{not json").await.unwrap();
        router.dispatch(&id, &sub, r#"{"id":1}"#).await.unwrap();

        let replies = events(&mut rx);
        assert_eq!(replies[0]["message"], "Invalid JSON format");
        assert_eq!(replies[1]["message"], "Missing message type");
    }

    #[tokio::test]
    async fn test_ping_echoes_id() {
        let (_registry, router, id, sub, mut rx) = setup().await;

        router
            .dispatch(&id, &sub, r#"{"type":"ping","id":"abc"}"#)
            .await
            .unwrap();

        let replies = events(&mut rx);
        assert_eq!(replies[0]["type"], "pong");
        assert_eq!(replies[0]["clientId"], id.as_str());
        assert_eq!(replies[0]["id"], "abc");
    }

    #[tokio::test]
    async fn test_start_without_producer() {
        let (registry, router, id, sub, mut rx) = setup().await;
        let (other, mut other_rx) = conn(2);
        registry.admit_subscriber(&other).await.unwrap();
        events(&mut other_rx);

        router
            .dispatch(&id, &sub, r#"{"type":"start-listening"}"#)
            .await
            .unwrap();

        let replies = events(&mut rx);
        assert_eq!(replies[0]["type"], "error");
        assert_eq!(replies[0]["message"], "ESP32 not connected");
        assert_eq!(replies[1]["type"], "streaming-status");
        assert_eq!(replies[1]["message"], "ESP32 not available");

        // The warning reaches everyone, the error only the caller
        let others = events(&mut other_rx);
        assert_eq!(others.len(), 1);
        assert_eq!(others[0]["esp32Connected"], false);
    }

    #[tokio::test]
    async fn test_start_and_stop_forwarded() {
        let (registry, router, id, sub, mut rx) = setup().await;
        let (producer, mut producer_rx) = conn(9);
        registry.admit_producer(&producer, "ESP32").await.unwrap();
        texts(&mut producer_rx);
        events(&mut rx);

        router
            .dispatch(&id, &sub, r#"{"type":"start-listening"}"#)
            .await
            .unwrap();
        router
            .dispatch(&id, &sub, r#"{"type":"stop-listening"}"#)
            .await
            .unwrap();

        assert_eq!(texts(&mut producer_rx), vec!["Listen", "Stop"]);
        let replies = events(&mut rx);
        assert_eq!(replies[0]["type"], "command-sent");
        assert_eq!(replies[0]["command"], "Listen");
        assert_eq!(replies[1]["command"], "Stop");
    }

    #[tokio::test]
    async fn test_status_and_clients() {
        let (registry, router, id, sub, mut rx) = setup().await;
        let (producer, _producer_rx) = conn(9);
        registry.admit_producer(&producer, "ESP32").await.unwrap();
        events(&mut rx);

        router
            .dispatch(&id, &sub, r#"{"type":"get-status"}"#)
            .await
            .unwrap();
        router
            .dispatch(&id, &sub, r#"{"type":"get-clients"}"#)
            .await
            .unwrap();

        let replies = events(&mut rx);
        assert_eq!(replies[0]["type"], "status");
        assert_eq!(replies[0]["streaming"], true);
        assert_eq!(replies[0]["esp32Connected"], true);
        assert_eq!(replies[0]["connectedClients"], 1);
        assert!(replies[0].get("message").is_none());

        assert_eq!(replies[1]["type"], "client-list");
        assert_eq!(replies[1]["total"], 1);
        assert_eq!(replies[1]["clients"][0]["id"], id.as_str());
    }
}
