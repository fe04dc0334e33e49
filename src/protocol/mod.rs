//! Wire vocabulary
//!
//! - [`producer`]: the small text vocabulary spoken on the producer endpoint
//! - [`control`]: JSON control messages exchanged with subscribers
//! - [`constants`]: tokens, close codes and endpoint defaults

pub mod constants;
pub mod control;
pub mod producer;

pub use control::{ClientEntry, ClientRequest, ProtocolError, ServerEvent};
pub use producer::ProducerMessage;

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
