//! Error types for wire encoding and decoding.

use thiserror::Error;

/// Malformed binary or textual wire data.
///
/// Decoders fail closed: a value is either fully parsed or rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended before the next field could be read
    #[error("truncated {field}: need {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Field being decoded
        field: &'static str,
        /// Bytes required by the field
        needed: usize,
        /// Bytes left in the input
        remaining: usize,
    },

    /// Bytes left over after the last field
    #[error("{0} trailing bytes after group metadata")]
    TrailingBytes(usize),

    /// A string field is not valid UTF-8
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// Admin blob is not a whole number of 64-char hex identities
    #[error("malformed admin list: {0}")]
    MalformedAdmins(String),

    /// Relay blob has an empty entry
    #[error("malformed relay list: {0}")]
    MalformedRelays(String),

    /// Hex string could not be decoded
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// Decoded value has the wrong length
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Required length
        expected: usize,
        /// Length found
        actual: usize,
    },

    /// Ciphersuite name or tag is not in the supported set
    #[error("unknown ciphersuite: {0}")]
    UnknownCipherSuite(String),
}

/// Value cannot be represented in the wire format.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Length-prefixed field exceeds `u16::MAX` bytes
    #[error("{field} is {len} bytes, limit is 65535")]
    FieldTooLong {
        /// Field being encoded
        field: &'static str,
        /// Actual length in bytes
        len: usize,
    },

    /// Relay URL is empty or contains the newline separator
    #[error("invalid relay url: {0:?}")]
    InvalidRelay(String),
}

/// Envelope failed integrity checks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Recomputed id differs from the carried id
    #[error("event id mismatch")]
    IdMismatch,

    /// Signed event kind arrived without a signature
    #[error("event {0} is not signed")]
    MissingSignature(String),

    /// Signature does not verify against the event pubkey
    #[error("bad signature on event {0}")]
    BadSignature(String),

    /// Content or tags could not be parsed
    #[error("malformed event: {0}")]
    Malformed(String),
}
