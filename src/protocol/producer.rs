//! Producer text vocabulary
//!
//! The producer channel is not a general command channel. Text frames are
//! matched against a fixed set of forms and everything else is dropped by the
//! caller after logging.

use super::constants::{PRODUCER_PONG, PRODUCER_STATUS_PREFIX};

/// A text frame received on the producer endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerMessage<'a> {
    /// The configured identification token
    Identify,
    /// Heartbeat acknowledgement
    Pong,
    /// Status report line, prefix included
    Status(&'a str),
    /// Anything else (trimmed)
    Unrecognized(&'a str),
}

impl<'a> ProducerMessage<'a> {
    /// Classify a text frame. Surrounding whitespace is ignored and the
    /// identification token must match exactly.
    pub fn parse(text: &'a str, identity: &str) -> Self {
        let line = text.trim();

        if line == identity {
            Self::Identify
        } else if line == PRODUCER_PONG {
            Self::Pong
        } else if line.starts_with(PRODUCER_STATUS_PREFIX) {
            Self::Status(line)
        } else {
            Self::Unrecognized(line)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::DEFAULT_PRODUCER_IDENTITY;

    #[test]
    fn test_identify_exact_match() {
        assert_eq!(
            ProducerMessage::parse("ESP32", DEFAULT_PRODUCER_IDENTITY),
            ProducerMessage::Identify
        );
        assert_eq!(
            ProducerMessage::parse("  ESP32\r\n", DEFAULT_PRODUCER_IDENTITY),
            ProducerMessage::Identify
        );
    }

    #[test]
    fn test_identify_is_case_sensitive() {
        assert_eq!(
            ProducerMessage::parse("esp32", DEFAULT_PRODUCER_IDENTITY),
            ProducerMessage::Unrecognized("esp32")
        );
        assert_eq!(
            ProducerMessage::parse("ESP32-S3", DEFAULT_PRODUCER_IDENTITY),
            ProducerMessage::Unrecognized("ESP32-S3")
        );
    }

    #[test]
    fn test_custom_identity() {
        assert_eq!(
            ProducerMessage::parse("MIC-01", "MIC-01"),
            ProducerMessage::Identify
        );
        assert_eq!(
            ProducerMessage::parse("ESP32", "MIC-01"),
            ProducerMessage::Unrecognized("ESP32")
        );
    }

    #[test]
    fn test_pong_and_status() {
        assert_eq!(
            ProducerMessage::parse("pong", DEFAULT_PRODUCER_IDENTITY),
            ProducerMessage::Pong
        );
        assert_eq!(
            ProducerMessage::parse("STATUS: recording\n", DEFAULT_PRODUCER_IDENTITY),
            ProducerMessage::Status("STATUS: recording")
        );
    }

    #[test]
    fn test_status_prefix_required() {
        assert_eq!(
            ProducerMessage::parse("status: ok", DEFAULT_PRODUCER_IDENTITY),
            ProducerMessage::Unrecognized("status: ok")
        );
    }
}
