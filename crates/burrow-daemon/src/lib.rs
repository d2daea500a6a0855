//! Burrow worker process.
//!
//! A long-lived daemon that holds one identity and its decrypted group state
//! in memory, and speaks newline-delimited JSON with a controlling process:
//!
//! ```text
//! controller ──stdin──►  runtime ──► bridge ──► burrow-core (MLS)
//!            ◄─stdout──     ▲          │  └──► store (files)
//!                           │          └─────► relay pool ──► relays
//!                           └── subscription ◄────────────────┘
//! ```
//!
//! - [`bridge`]: command handling and network ingestion
//! - [`runtime`]: the single-task loop merging commands and relay events
//! - [`access`] and [`audit`]: allow-list policy and its audit trail
//! - [`store`]: flat-file and in-memory persistence
//! - [`system_env`]: the production environment
//!
//! Logs go to stderr; stdout carries protocol lines only.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod access;
pub mod audit;
pub mod bridge;
pub mod error;
pub mod runtime;
mod seen;
pub mod store;
pub mod system_env;

pub use access::{AccessControl, AccessControlConfig, DefaultPolicy};
pub use audit::AuditLog;
pub use bridge::Bridge;
pub use error::{AccessError, BridgeError, ConfigError, StoreError};
pub use runtime::run;
pub use store::{FileStore, MemoryStore, Store};
pub use system_env::SystemEnv;
