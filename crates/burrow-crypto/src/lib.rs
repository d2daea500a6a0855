//! Burrow message cipher.
//!
//! Two independent authenticated-encryption modes sit on top of MLS:
//!
//! ```text
//! Group-message mode                    Direct-recipient mode
//!
//! MLS exporter secret (per epoch)       sender static secret
//!        │                                     │   recipient public key
//!        ▼                                     ▼   │
//! x25519 scalar ──► public point        x25519 DH ◄┘
//!        │               │                     │
//!        └──► self DH ◄──┘                     │
//!                │                             │
//!                ▼                             ▼
//!        HKDF (group salt)             HKDF (direct salt)
//!                │                             │
//!                ▼                             ▼
//!        XChaCha20-Poly1305            XChaCha20-Poly1305
//!        0x01 || nonce || ct           0x02 || nonce || ct
//! ```
//!
//! Group mode derives a keypair from the exporter secret and encrypts to
//! itself. Every member of the current epoch computes the same exporter
//! secret, so every member can open the message; nobody outside the epoch
//! can. Direct mode is an ordinary two-party DH used for invitations, which
//! travel before the recipient holds any group secret.
//!
//! # Security
//!
//! - The modes use different HKDF salts and different version bytes. A
//!   ciphertext produced in one mode never opens in the other.
//! - Exported secrets are bound to one epoch. Callers must fetch a fresh
//!   secret after every epoch change; messages from an older epoch fail to
//!   open with the new secret.
//! - Decryption fails closed with [`CipherError::Decrypt`] on any tag
//!   mismatch. No partial plaintext is ever returned.
//! - Derived symmetric keys are zeroized on drop.
//!
//! All functions are pure: the caller supplies the 24-byte nonce, drawn from
//! a cryptographically secure source in production.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod aead;
pub mod direct;
pub mod error;
pub mod group;

pub use aead::{NONCE_SIZE, OVERHEAD, TAG_SIZE};
pub use direct::{DIRECT_VERSION, decrypt_direct, encrypt_direct};
pub use error::CipherError;
pub use group::{GROUP_VERSION, decrypt_group, encrypt_group, group_public_key};
pub use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519Secret};
