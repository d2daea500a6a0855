//! Burrow relay transport.
//!
//! Moves MLS artefacts between clients through store-and-forward relays:
//!
//! - [`envelope`]: wraps key packages, group messages and invitations in
//!   relay events, and opens them again
//! - [`relay`]: the [`Relay`] trait and de-duplicating subscriptions
//! - [`pool`]: fan-out over several relays with per-relay timeouts
//! - [`websocket`] and [`memory`]: the two relay implementations
//!
//! Relays are untrusted. Every envelope is verified before it is opened, and
//! group messages are only readable with the current epoch's exporter secret.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod envelope;
pub mod error;
pub mod memory;
pub mod message;
pub mod pool;
pub mod relay;
pub mod websocket;

pub use burrow_proto::{Event, Filter};
pub use error::{EnvelopeError, TransportError};
pub use memory::MemoryRelay;
pub use pool::{PublishOutcome, RelayPool};
pub use relay::{Relay, Subscription, SubscriptionEvent, SubscriptionSink};
pub use websocket::WebSocketRelay;
