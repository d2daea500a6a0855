//! MLS (Messaging Layer Security) implementation.
//!
//! Implements MLS (RFC 9420) group messaging on top of openmls. Groups carry
//! their Burrow metadata as a group context extension, so every member agrees
//! on name, admins and relays at every epoch.
//!
//! # Components
//!
//! - [`key_package`]: KeyPackage factory and pending join state
//! - [`group`]: Client-side group state machine
//! - [`welcome`]: Two-step join from a welcome
//! - [`provider`]: `OpenMLS` provider integration
//! - [`error`]: MLS-specific error types
//! - [`constants`]: Protocol constants and the fixed join configuration

pub mod constants;
pub mod error;
pub mod group;
pub mod key_package;
pub mod provider;
pub mod welcome;

pub use constants::DEFAULT_JOIN_CONFIG;
pub use error::MlsError;
pub use group::{CommitResult, Group, GroupConfig, ProcessResult, Proposal};
pub use key_package::{GeneratedKeyPackage, PendingJoin, key_package_identity};
pub use provider::MlsProvider;
pub use welcome::{StagedJoin, welcome_key_package_refs};
