//! Burrow protocol core.
//!
//! Sans-IO building blocks for an MLS client that publishes over relays:
//!
//! - [`env`]: time and randomness behind a trait, so group creation and key
//!   generation replay exactly under a seeded environment
//! - [`identity`]: the long-term Ed25519 identity and its conversions
//! - [`mls`]: key package factory and the per-group MLS engine
//!
//! Nothing in this crate touches the network or the filesystem except
//! identity file loading. Callers own persistence and transport.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod env;
pub mod identity;
pub mod mls;

pub use env::Environment;
pub use identity::{Identity, IdentityError};
pub use mls::{
    CommitResult, GeneratedKeyPackage, Group, GroupConfig, MlsError, PendingJoin, ProcessResult,
    Proposal, StagedJoin,
};
