//! Direct-recipient mode.
//!
//! Used for invitations, which precede group membership. Keys are static
//! x25519 keys; the caller converts identity keys before calling.

use x25519_dalek::{PublicKey, StaticSecret};

use crate::{
    aead::{NONCE_SIZE, derive_key, open, seal},
    error::CipherError,
};

/// Leading byte of direct-mode ciphertexts.
pub const DIRECT_VERSION: u8 = 0x02;

const DIRECT_SALT: &[u8] = b"burrow-direct-v1";
const DIRECT_INFO: &[u8] = b"burrow direct message";

fn direct_key(
    our_secret: &StaticSecret,
    their_public: &PublicKey,
) -> Result<zeroize::Zeroizing<[u8; 32]>, CipherError> {
    let shared = our_secret.diffie_hellman(their_public);
    if !shared.was_contributory() {
        return Err(CipherError::WeakKey);
    }
    Ok(derive_key(DIRECT_SALT, shared.as_bytes(), DIRECT_INFO))
}

/// Encrypt `plaintext` from `sender` to `recipient`.
///
/// # Errors
///
/// - `WeakKey` if `recipient` is a low-order point
pub fn encrypt_direct(
    sender: &StaticSecret,
    recipient: &PublicKey,
    plaintext: &[u8],
    nonce: [u8; NONCE_SIZE],
) -> Result<Vec<u8>, CipherError> {
    let key = direct_key(sender, recipient)?;
    Ok(seal(DIRECT_VERSION, &key, plaintext, nonce))
}

/// Decrypt a direct-mode ciphertext addressed to `recipient` from `sender`.
///
/// # Errors
///
/// - `Decrypt` on tag mismatch, wrong mode or short input
/// - `WeakKey` if `sender` is a low-order point
pub fn decrypt_direct(
    recipient: &StaticSecret,
    sender: &PublicKey,
    ciphertext: &[u8],
) -> Result<Vec<u8>, CipherError> {
    let key = direct_key(recipient, sender)?;
    open(DIRECT_VERSION, &key, ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair(seed: u8) -> (StaticSecret, PublicKey) {
        let secret = StaticSecret::from([seed; 32]);
        let public = PublicKey::from(&secret);
        (secret, public)
    }

    #[test]
    fn roundtrip_between_two_parties() {
        let (alice, alice_pub) = keypair(1);
        let (bob, bob_pub) = keypair(2);

        let ct = encrypt_direct(&alice, &bob_pub, b"invite", [9; NONCE_SIZE]).unwrap();
        assert_eq!(ct[0], DIRECT_VERSION);
        assert_eq!(decrypt_direct(&bob, &alice_pub, &ct).unwrap(), b"invite");
    }

    #[test]
    fn third_party_cannot_open() {
        let (alice, alice_pub) = keypair(1);
        let (_, bob_pub) = keypair(2);
        let (eve, _) = keypair(3);

        let ct = encrypt_direct(&alice, &bob_pub, b"invite", [0; NONCE_SIZE]).unwrap();
        assert!(decrypt_direct(&eve, &alice_pub, &ct).is_err());
    }

    #[test]
    fn low_order_point_is_rejected() {
        let (alice, _) = keypair(1);
        let identity_point = PublicKey::from([0u8; 32]);
        assert_eq!(
            encrypt_direct(&alice, &identity_point, b"x", [0; NONCE_SIZE]),
            Err(CipherError::WeakKey)
        );
    }
}
