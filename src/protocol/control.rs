//! Subscriber control messages
//!
//! Inbound messages are JSON objects tagged by a `type` field. They are parsed
//! in two steps so a payload that is not JSON, a payload without a tag, and a
//! tag nobody understands each produce a distinct error reply.
//!
//! Outbound messages are [`ServerEvent`]s, serialized as internally tagged
//! JSON with camelCase fields and a millisecond `timestamp`.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::now_millis;

/// Request sent by a subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    /// Application-level ping; `id` is echoed back if present
    Ping { id: Option<Value> },
    /// Ask the producer to start streaming
    StartListening,
    /// Ask the producer to stop streaming
    StopListening,
    /// Ask for the current streaming/connection snapshot
    GetStatus,
    /// Ask for the list of connected subscribers
    GetClients,
}

/// Reasons a subscriber message could not be dispatched
///
/// The `Display` text is sent verbatim as the `message` of an `error` reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Payload is not a JSON object
    #[error("Invalid JSON format")]
    InvalidJson,
    /// Object has no string `type` field
    #[error("Missing message type")]
    MissingType,
    /// Tag outside the known vocabulary
    #[error("Unknown message type: {0}")]
    UnknownType(String),
}

impl ClientRequest {
    /// Parse a text frame from a subscriber
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(|_| ProtocolError::InvalidJson)?;
        let Value::Object(mut fields) = value else {
            return Err(ProtocolError::InvalidJson);
        };

        let kind = match fields.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            _ => return Err(ProtocolError::MissingType),
        };

        match kind.as_str() {
            "ping" => Ok(Self::Ping {
                id: fields.remove("id"),
            }),
            "start-listening" => Ok(Self::StartListening),
            "stop-listening" => Ok(Self::StopListening),
            "get-status" => Ok(Self::GetStatus),
            "get-clients" => Ok(Self::GetClients),
            _ => Err(ProtocolError::UnknownType(kind)),
        }
    }

    /// Wire tag of this request
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping { .. } => "ping",
            Self::StartListening => "start-listening",
            Self::StopListening => "stop-listening",
            Self::GetStatus => "get-status",
            Self::GetClients => "get-clients",
        }
    }
}

/// One row of a `client-list` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientEntry {
    /// Subscriber id
    pub id: String,
    /// Whether the subscriber's transport is still open
    pub connected: bool,
}

/// Message sent by the server to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Reply to an application-level ping
    #[serde(rename_all = "camelCase")]
    Pong {
        client_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        timestamp: i64,
    },

    /// Streaming/connection snapshot
    #[serde(rename_all = "camelCase")]
    Status {
        streaming: bool,
        esp32_connected: bool,
        client_id: String,
        connected_clients: usize,
        server_uptime: f64,
        server_time: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Producer came or went
    #[serde(rename_all = "camelCase")]
    StreamingStatus {
        streaming: bool,
        esp32_connected: bool,
        message: String,
        timestamp: i64,
    },

    /// Status line reported by the producer
    #[serde(rename = "esp32-status")]
    ProducerStatus { status: String, timestamp: i64 },

    /// A command was forwarded to the producer
    CommandSent { command: String, timestamp: i64 },

    /// Connected subscribers
    ClientList {
        clients: Vec<ClientEntry>,
        total: usize,
        timestamp: i64,
    },

    /// Request could not be served
    Error { message: String, timestamp: i64 },

    /// Server is about to close every connection
    ServerShutdown { message: String, timestamp: i64 },

    /// Base64 envelope around one relayed frame
    Audio {
        data: String,
        size: usize,
        timestamp: i64,
    },
}

impl ServerEvent {
    /// `pong` reply for subscriber `client_id`
    pub fn pong(client_id: &str, id: Option<Value>) -> Self {
        Self::Pong {
            client_id: client_id.to_owned(),
            id,
            timestamp: now_millis(),
        }
    }

    /// `streaming-status` event
    pub fn streaming_status(streaming: bool, producer_connected: bool, message: &str) -> Self {
        Self::StreamingStatus {
            streaming,
            esp32_connected: producer_connected,
            message: message.to_owned(),
            timestamp: now_millis(),
        }
    }

    /// `esp32-status` event carrying a producer status line
    pub fn producer_status(status: &str) -> Self {
        Self::ProducerStatus {
            status: status.to_owned(),
            timestamp: now_millis(),
        }
    }

    /// `command-sent` event
    pub fn command_sent(command: &str) -> Self {
        Self::CommandSent {
            command: command.to_owned(),
            timestamp: now_millis(),
        }
    }

    /// `client-list` reply
    pub fn client_list(clients: Vec<ClientEntry>) -> Self {
        Self::ClientList {
            total: clients.len(),
            clients,
            timestamp: now_millis(),
        }
    }

    /// `error` reply
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timestamp: now_millis(),
        }
    }

    /// `server-shutdown` notice
    pub fn server_shutdown() -> Self {
        Self::ServerShutdown {
            message: "Server is shutting down".to_owned(),
            timestamp: now_millis(),
        }
    }

    /// Wire tag of this event
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pong { .. } => "pong",
            Self::Status { .. } => "status",
            Self::StreamingStatus { .. } => "streaming-status",
            Self::ProducerStatus { .. } => "esp32-status",
            Self::CommandSent { .. } => "command-sent",
            Self::ClientList { .. } => "client-list",
            Self::Error { .. } => "error",
            Self::ServerShutdown { .. } => "server-shutdown",
            Self::Audio { .. } => "audio",
        }
    }

    /// Serialize once; the result is shared between recipients
    pub fn encode(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}
