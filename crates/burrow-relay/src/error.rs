//! Transport and envelope errors.

use burrow_crypto::CipherError;
use burrow_proto::EventError;
use thiserror::Error;

/// Errors talking to relays.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The pool has no relays configured
    #[error("no relays configured")]
    NoRelays,

    /// Could not reach the relay
    #[error("{relay}: connection failed: {reason}")]
    Connection {
        /// Relay URL
        relay: String,
        /// Underlying error
        reason: String,
    },

    /// Relay refused the event
    #[error("{relay}: rejected: {reason}")]
    Rejected {
        /// Relay URL
        relay: String,
        /// Relay's explanation
        reason: String,
    },

    /// Relay did not answer in time
    #[error("{relay}: timed out")]
    Timeout {
        /// Relay URL
        relay: String,
    },

    /// Relay sent something we could not understand
    #[error("{relay}: protocol error: {reason}")]
    Protocol {
        /// Relay URL
        relay: String,
        /// What was wrong
        reason: String,
    },

    /// Every relay failed
    #[error("all relays failed: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    AllFailed(Vec<TransportError>),
}

/// Errors building or opening envelopes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Envelope has an unexpected kind
    #[error("expected kind {expected}, got {actual}")]
    WrongKind {
        /// Kind the operation handles
        expected: u16,
        /// Kind of the envelope
        actual: u16,
    },

    /// A required tag is absent
    #[error("missing tag {0}")]
    MissingTag(&'static str),

    /// Content is not valid hex or JSON
    #[error("malformed content: {0}")]
    Content(String),

    /// Seal signer and rumor author differ
    #[error("seal signer does not match rumor author")]
    AuthorMismatch,

    /// A key is not a valid curve point
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Signature or id check failed
    #[error(transparent)]
    Event(#[from] EventError),

    /// Decryption failed
    #[error(transparent)]
    Cipher(#[from] CipherError),
}
