//! Long-term identity.
//!
//! An identity is an Ed25519 keypair. The public key names the member
//! everywhere: it is the MLS basic credential, the author of announcements
//! and seals, and the admin entry in group metadata. The secret key never
//! leaves the process except through [`Identity::persist`].

use std::{fmt, fs, io::Write, path::Path};

use burrow_crypto::{X25519PublicKey, X25519Secret};
use burrow_proto::PublicKey;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use openmls::prelude::BasicCredential;
use zeroize::Zeroizing;

use crate::env::Environment;

/// Identity loading and parsing failures.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Secret key is not valid hex.
    #[error("invalid secret key hex: {0}")]
    InvalidHex(String),

    /// Secret key has the wrong length.
    #[error("invalid secret key length: expected 32 bytes, got {0}")]
    InvalidLength(usize),

    /// Public key is not a valid curve point.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(PublicKey),

    /// Identity file could not be read or written.
    #[error("identity file: {0}")]
    Io(#[from] std::io::Error),
}

/// Ed25519 identity of this client.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity").field("public_key", &self.public_key()).finish_non_exhaustive()
    }
}

impl Identity {
    /// Fresh identity from environment randomness.
    pub fn generate<E: Environment>(env: &E) -> Self {
        let secret = Zeroizing::new(env.random_array::<32>());
        Self::from_secret_bytes(&secret)
    }

    /// Identity from raw secret key bytes.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Self { signing_key: SigningKey::from_bytes(secret) }
    }

    /// Identity from a hex secret key. Surrounding whitespace is ignored.
    pub fn from_secret_hex(hex_secret: &str) -> Result<Self, IdentityError> {
        let bytes = Zeroizing::new(
            hex::decode(hex_secret.trim()).map_err(|e| IdentityError::InvalidHex(e.to_string()))?,
        );
        let secret: &[u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| IdentityError::InvalidLength(bytes.len()))?;
        Ok(Self::from_secret_bytes(secret))
    }

    /// Load the identity stored at `path`, or generate and persist a new one.
    pub fn load_or_generate<E: Environment>(path: &Path, env: &E) -> Result<Self, IdentityError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let identity = Self::from_secret_hex(&contents)?;
                tracing::debug!(pubkey = %identity.public_key(), path = %path.display(), "loaded identity");
                Ok(identity)
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let identity = Self::generate(env);
                identity.persist(path)?;
                tracing::info!(pubkey = %identity.public_key(), path = %path.display(), "generated identity");
                Ok(identity)
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Write the secret key as hex to `path`, owner read/write only on unix.
    pub fn persist(&self, path: &Path) -> Result<(), IdentityError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(path)?;
        file.write_all(self.secret_key_hex().as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        Ok(())
    }

    /// Public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_bytes(self.signing_key.verifying_key().to_bytes())
    }

    /// Public key as lowercase hex.
    pub fn public_key_hex(&self) -> String {
        self.public_key().to_hex()
    }

    /// Secret key as lowercase hex.
    pub fn secret_key_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.signing_key.to_bytes()))
    }

    /// Underlying signing key, for signing envelopes.
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Sign arbitrary bytes.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// MLS basic credential naming this identity.
    pub fn credential(&self) -> BasicCredential {
        BasicCredential::new(self.public_key().as_bytes().to_vec())
    }

    /// X25519 secret for direct-mode encryption.
    pub fn x25519_secret(&self) -> X25519Secret {
        X25519Secret::from(self.signing_key.to_scalar_bytes())
    }
}

/// X25519 public key of another identity, for direct-mode encryption.
pub fn x25519_public(identity: &PublicKey) -> Result<X25519PublicKey, IdentityError> {
    let key = VerifyingKey::from_bytes(identity.as_bytes())
        .map_err(|_| IdentityError::InvalidPublicKey(*identity))?;
    Ok(X25519PublicKey::from(key.to_montgomery().to_bytes()))
}
