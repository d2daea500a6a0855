//! Burrow wire formats.
//!
//! Everything that crosses a process or network boundary is defined here:
//!
//! - [`metadata`]: the group-metadata MLS extension and its binary codec
//! - [`suite`]: the closed set of supported MLS ciphersuites and their tags
//! - [`event`]: relay envelopes (signed events, unsigned rumors, filters)
//! - [`kinds`]: envelope kind numbers and tag names
//! - [`bridge`]: JSON-lines commands and responses spoken by the daemon
//!
//! Encoding is strict in both directions. Decoders never return partially
//! parsed values; any structural problem is a [`DecodeError`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod bridge;
pub mod error;
pub mod event;
pub mod key;
pub mod kinds;
pub mod metadata;
pub mod suite;

pub use bridge::{Command, GroupSummary, Response};
pub use error::{DecodeError, EncodeError, EventError};
pub use event::{Event, EventBuilder, Filter};
pub use key::PublicKey;
pub use metadata::{GROUP_METADATA_EXTENSION_TYPE, GroupMetadata, LAST_RESORT_EXTENSION_TYPE};
pub use suite::CipherSuite;
