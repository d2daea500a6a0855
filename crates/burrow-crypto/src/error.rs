//! Cipher errors.

use thiserror::Error;

/// Errors from the message cipher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    /// Authentication failed, the mode byte is wrong, or the input is too
    /// short to be a ciphertext
    #[error("decryption failed: {reason}")]
    Decrypt {
        /// What went wrong
        reason: &'static str,
    },

    /// Peer public key is a low-order point
    #[error("non-contributory key agreement")]
    WeakKey,
}
