//! Connection registry for producer/subscriber routing
//!
//! The registry owns the single producer slot and the set of admitted
//! subscribers, and relays producer frames to every subscriber.
//!
//! # Architecture
//!
//! ```text
//!                            Arc<Registry>
//!                     ┌──────────────────────────┐
//!                     │ Mutex<RegistryState {    │
//!                     │   producer: Option<Slot>,│
//!                     │   subscribers: HashMap,  │
//!                     │   timers: Heartbeats,    │
//!                     │ }>                       │
//!                     └────────────┬─────────────┘
//!                                  │
//!          ┌───────────────────────┼───────────────────────┐
//!          │                       │                       │
//!          ▼                       ▼                       ▼
//!     [Producer]             [Subscriber]            [Subscriber]
//!     read loop              mpsc queue              mpsc queue
//!          │                       │                       │
//!          └──► registry.relay() ──► try_send() ──► writer ──► socket
//! ```
//!
//! # Zero-Copy Design
//!
//! `bytes::Bytes` uses reference counting, so all subscribers share the same
//! payload allocation. A subscriber whose queue is full or closed is dropped
//! during the fan-out instead of being waited on.

pub mod config;
pub mod entry;
pub mod error;
pub mod frame;
pub mod store;

pub use config::RegistryConfig;
pub use entry::{ProducerSlot, StatusSnapshot, SubscriberSession};
pub use error::RegistryError;
pub use frame::{RelayEncoding, RelayFrame, SubscriberId};
pub use store::Registry;
