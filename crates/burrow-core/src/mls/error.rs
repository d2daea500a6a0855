//! MLS error types.

use burrow_proto::{DecodeError, EncodeError, PublicKey};
use thiserror::Error;

/// Errors from the key package factory and the group engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MlsError {
    /// An openmls cryptographic operation failed
    #[error("crypto error: {0}")]
    Crypto(String),

    /// TLS or state blob (de)serialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Operation not valid in the current group state
    #[error("invalid state: {0}")]
    ProtocolState(String),

    /// A local commit awaits merge; no other commit or send is allowed
    #[error("commit for epoch {target_epoch} is pending")]
    PendingCommit {
        /// Epoch the pending commit creates once merged
        target_epoch: u64,
    },

    /// Membership change attempted by a non-admin
    #[error("{0} is not an admin of this group")]
    NotAdmin(PublicKey),

    /// Group metadata extension could not be decoded
    #[error("metadata: {0}")]
    Decode(#[from] DecodeError),

    /// Group metadata extension could not be encoded
    #[error("metadata: {0}")]
    Encode(#[from] EncodeError),
}
