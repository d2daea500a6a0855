//! Group-message mode.

use x25519_dalek::{PublicKey, StaticSecret};

use crate::{
    aead::{NONCE_SIZE, derive_key, open, seal},
    error::CipherError,
};

/// Leading byte of group-mode ciphertexts.
pub const GROUP_VERSION: u8 = 0x01;

const GROUP_SALT: &[u8] = b"burrow-group-v1";

/// Public point of the keypair derived from an exporter secret.
///
/// Every member of the epoch derives the same point.
pub fn group_public_key(exporter_secret: &[u8; 32]) -> [u8; 32] {
    let secret = StaticSecret::from(*exporter_secret);
    PublicKey::from(&secret).to_bytes()
}

fn group_key(exporter_secret: &[u8; 32]) -> zeroize::Zeroizing<[u8; 32]> {
    let secret = StaticSecret::from(*exporter_secret);
    let public = PublicKey::from(&secret);
    let shared = secret.diffie_hellman(&public);
    derive_key(GROUP_SALT, shared.as_bytes(), public.as_bytes())
}

/// Encrypt `plaintext` for every holder of `exporter_secret`.
pub fn encrypt_group(
    exporter_secret: &[u8; 32],
    plaintext: &[u8],
    nonce: [u8; NONCE_SIZE],
) -> Vec<u8> {
    let key = group_key(exporter_secret);
    seal(GROUP_VERSION, &key, plaintext, nonce)
}

/// Decrypt a group-mode ciphertext.
///
/// # Errors
///
/// - `Decrypt` if the secret is from another epoch, the data was tampered
///   with, or the data is not a group-mode ciphertext
pub fn decrypt_group(
    exporter_secret: &[u8; 32],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CipherError> {
    let key = group_key(exporter_secret);
    open(GROUP_VERSION, &key, ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aead::OVERHEAD;

    #[test]
    fn roundtrip() {
        let secret = [7u8; 32];
        let ct = encrypt_group(&secret, b"hello group", [1; NONCE_SIZE]);
        assert_eq!(ct[0], GROUP_VERSION);
        assert_eq!(ct.len(), b"hello group".len() + OVERHEAD);
        assert_eq!(decrypt_group(&secret, &ct).unwrap(), b"hello group");
    }

    #[test]
    fn other_epoch_secret_fails() {
        let ct = encrypt_group(&[1; 32], b"epoch 1", [0; NONCE_SIZE]);
        assert_eq!(
            decrypt_group(&[2; 32], &ct),
            Err(CipherError::Decrypt { reason: "authentication failed" })
        );
    }

    #[test]
    fn public_key_is_deterministic() {
        assert_eq!(group_public_key(&[5; 32]), group_public_key(&[5; 32]));
        assert_ne!(group_public_key(&[5; 32]), group_public_key(&[6; 32]));
    }

    #[test]
    fn short_input_fails_closed() {
        assert_eq!(
            decrypt_group(&[0; 32], &[GROUP_VERSION; 10]),
            Err(CipherError::Decrypt { reason: "ciphertext too short" })
        );
    }
}
