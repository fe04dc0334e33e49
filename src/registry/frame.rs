//! Relay frame types
//!
//! This module defines subscriber ids and the frames relayed from the
//! producer to subscribers.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;

use crate::protocol::{now_millis, ServerEvent};
use crate::session::Outbound;

/// Opaque subscriber id, generated by the server at admission
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(String);

impl SubscriberId {
    /// Allocate a fresh id
    pub fn generate() -> Self {
        Self(format!("client_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Borrow the id as text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How relayed frames are presented to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayEncoding {
    /// Binary WebSocket frame, bytes passed through untouched
    #[default]
    Binary,
    /// JSON text frame `{"type":"audio","data":<base64>,...}`
    Base64Envelope,
}

impl std::str::FromStr for RelayEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binary" | "raw" => Ok(Self::Binary),
            "base64" | "envelope" | "json" => Ok(Self::Base64Envelope),
            other => Err(format!("unknown relay encoding: {}", other)),
        }
    }
}

/// A frame received from the producer
///
/// Cheap to clone: `Bytes` is reference counted, so every subscriber shares
/// the same allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFrame {
    /// Frame payload, exactly as received
    pub data: Bytes,
    /// Receive time in milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl RelayFrame {
    /// Wrap a payload received now
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            timestamp: now_millis(),
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Build the outbound frame shared by every subscriber
    pub fn to_outbound(&self, encoding: RelayEncoding) -> Result<Outbound, serde_json::Error> {
        match encoding {
            RelayEncoding::Binary => Ok(Outbound::Binary(self.data.clone())),
            RelayEncoding::Base64Envelope => {
                let envelope = ServerEvent::Audio {
                    data: STANDARD.encode(&self.data),
                    size: self.data.len(),
                    timestamp: self.timestamp,
                };
                envelope.encode().map(Outbound::Text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_ids_are_unique() {
        let a = SubscriberId::generate();
        let b = SubscriberId::generate();

        assert_ne!(a, b);
        assert!(a.as_str().starts_with("client_"));
    }

    #[test]
    fn test_relay_encoding_from_str() {
        assert_eq!("binary".parse::<RelayEncoding>(), Ok(RelayEncoding::Binary));
        assert_eq!("BASE64".parse::<RelayEncoding>(), Ok(RelayEncoding::Base64Envelope));
        assert!("gzip".parse::<RelayEncoding>().is_err());
    }

    #[test]
    fn test_binary_passthrough_shares_bytes() {
        let data = Bytes::from(vec![0u8, 1, 2, 255]);
        let frame = RelayFrame::new(data.clone());

        match frame.to_outbound(RelayEncoding::Binary).unwrap() {
            Outbound::Binary(out) => {
                assert_eq!(out, data);
                assert_eq!(out.as_ptr(), data.as_ptr());
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_base64_envelope_is_lossless() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let frame = RelayFrame::new(Bytes::from(payload.clone()));

        let Outbound::Text(text) = frame.to_outbound(RelayEncoding::Base64Envelope).unwrap()
        else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["type"], "audio");
        assert_eq!(value["size"], 256);
        let decoded = STANDARD.decode(value["data"].as_str().unwrap()).unwrap();
        assert_eq!(decoded, payload);
    }
}
