//! Daemon error types.
//!
//! Per-command failures become `{"type":"error"}` lines and the worker keeps
//! running. Configuration failures are fatal at startup.

use std::{io, path::PathBuf};

use burrow_core::{IdentityError, MlsError};
use burrow_proto::{DecodeError, EncodeError, PublicKey};
use burrow_relay::{EnvelopeError, TransportError};
use thiserror::Error;

/// Access policy refused an action.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// Identity is neither the owner nor allow-listed
    #[error("contact {0} is not allowed")]
    ContactDenied(PublicKey),

    /// Group is not allow-listed
    #[error("group {0} is not allowed")]
    GroupDenied(String),
}

/// Startup configuration is unusable.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Neither the environment nor the policy file names an owner
    #[error("no owner configured: set BURROW_OWNER_PUBKEY or \"owner\" in {0}")]
    MissingOwner(PathBuf),

    /// Policy file could not be parsed
    #[error("invalid access policy {path}: {reason}")]
    InvalidPolicy {
        /// Policy file
        path: PathBuf,
        /// Parse error
        reason: String,
    },

    /// Owner key is not a valid identity
    #[error("invalid owner key: {0}")]
    InvalidOwner(#[from] DecodeError),

    /// Identity could not be loaded
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Policy or audit file could not be accessed
    #[error("{path}: {source}")]
    Io {
        /// File being accessed
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },
}

/// Persistence failure.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Record id cannot be used as a file name
    #[error("invalid record id: {0:?}")]
    InvalidId(String),

    /// Filesystem access failed
    #[error("{path}: {source}")]
    Io {
        /// File being accessed
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// Stored record could not be (de)serialized
    #[error("corrupt record {path}: {reason}")]
    Corrupt {
        /// File holding the record
        path: PathBuf,
        /// Parse error
        reason: String,
    },
}

/// Any failure while handling a command or a network event.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// No group with this wire id is loaded
    #[error("unknown group: {0}")]
    UnknownGroup(String),

    /// No staged invitation with this id
    #[error("unknown welcome: {0}")]
    UnknownWelcome(String),

    /// Welcome does not reference any of our key packages
    #[error("welcome matches none of our key packages")]
    NoMatchingKeyPackage,

    /// Key package announcement is signed by someone other than the
    /// identity inside the key package
    #[error("key package in event {event_id} is not owned by its author {author}")]
    KeyPackageOwner {
        /// Announcement id
        event_id: String,
        /// Announcement signer
        author: PublicKey,
    },

    /// Command arguments are unusable
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Group engine failure
    #[error(transparent)]
    Mls(#[from] MlsError),

    /// Envelope could not be built or opened
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Relay failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Access policy refusal
    #[error(transparent)]
    Access(#[from] AccessError),

    /// Persistence failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Configuration failure
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Metadata could not be encoded
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// Protocol stream failure
    #[error("io: {0}")]
    Io(#[from] io::Error),
}
