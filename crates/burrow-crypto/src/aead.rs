//! Shared framing and AEAD for both cipher modes.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CipherError;

/// XChaCha20 nonce size
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size
pub const TAG_SIZE: usize = 16;

/// Bytes added to a plaintext: version byte, nonce and tag.
pub const OVERHEAD: usize = 1 + NONCE_SIZE + TAG_SIZE;

/// HKDF-SHA256 expand to a 32-byte AEAD key.
pub(crate) fn derive_key(salt: &[u8], ikm: &[u8], info: &[u8]) -> Zeroizing<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut key = Zeroizing::new([0u8; 32]);

    // 32 bytes is far below the 255 * 32 HKDF limit.
    let Ok(()) = hk.expand(info, &mut key[..]) else {
        unreachable!("HKDF expand to 32 bytes cannot fail");
    };
    key
}

/// `version || nonce || ciphertext`.
pub(crate) fn seal(
    version: u8,
    key: &[u8; 32],
    plaintext: &[u8],
    nonce: [u8; NONCE_SIZE],
) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new(key.into());

    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), plaintext) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    let mut out = Vec::with_capacity(1 + NONCE_SIZE + ciphertext.len());
    out.push(version);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    out
}

/// Inverse of [`seal`].
pub(crate) fn open(version: u8, key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>, CipherError> {
    if data.len() < OVERHEAD {
        return Err(CipherError::Decrypt { reason: "ciphertext too short" });
    }
    if data[0] != version {
        return Err(CipherError::Decrypt { reason: "wrong cipher mode" });
    }

    let (nonce, ciphertext) = data[1..].split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());

    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CipherError::Decrypt { reason: "authentication failed" })
}
