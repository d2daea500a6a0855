//! KeyPackage factory.
//!
//! A key package is the signed, single-use invitation token a member
//! publishes so others can add them. The public half goes to relays; the
//! private half ([`PendingJoin`]) stays local until a welcome consumes it.

use burrow_proto::{CipherSuite, PublicKey};
use openmls::{
    key_packages::KeyPackageIn,
    prelude::{CredentialWithKey, KeyPackage, ProtocolVersion},
};
use openmls_basic_credential::SignatureKeyPair;
use openmls_rust_crypto::RustCrypto;
use openmls_traits::{OpenMlsProvider, crypto::OpenMlsCrypto};
use tls_codec::{Deserialize as _, Serialize as _};

use super::{
    constants,
    error::MlsError,
    group::credential_identity,
    provider::{MlsProvider, StorageSnapshot},
};
use crate::{env::Environment, identity::Identity};

/// Fresh key package and the private state needed to join with it.
pub struct GeneratedKeyPackage<E: Environment> {
    /// Public key package
    pub key_package: KeyPackage,
    /// TLS serialization of [`Self::key_package`]
    pub serialized: Vec<u8>,
    /// Key package hash reference
    pub hash_ref: Vec<u8>,
    /// Private material, consumed when a welcome for this package arrives
    pub pending: PendingJoin<E>,
}

/// Private state behind a published key package.
///
/// Holds the HPKE init key and leaf key (inside the provider storage) and the
/// MLS signer that will sign as this member once the welcome is accepted.
pub struct PendingJoin<E: Environment> {
    pub(crate) provider: MlsProvider<E>,
    pub(crate) signer: SignatureKeyPair,
    pub(crate) suite: CipherSuite,
    pub(crate) owner: PublicKey,
    pub(crate) last_resort: bool,
    pub(crate) hash_ref: Vec<u8>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct PendingJoinBlob {
    version: u16,
    suite: CipherSuite,
    owner: PublicKey,
    last_resort: bool,
    hash_ref: Vec<u8>,
    signer: SignatureKeyPair,
    storage: StorageSnapshot,
}

/// Generate a key package for `identity`.
///
/// Last-resort packages carry the empty last-resort extension and may be
/// used by several welcomes; the caller decides when to discard the others.
pub fn generate<E: Environment>(
    env: &E,
    identity: &Identity,
    suite: CipherSuite,
    last_resort: bool,
) -> Result<GeneratedKeyPackage<E>, MlsError> {
    let provider = MlsProvider::new(env.clone());
    let signer = new_signer(env, suite)?;

    let credential_with_key = CredentialWithKey {
        credential: identity.credential().into(),
        signature_key: signer.public().into(),
    };

    let mut builder = KeyPackage::builder().leaf_node_capabilities(constants::capabilities(suite));
    if last_resort {
        builder = builder.mark_as_last_resort();
    }

    let bundle = builder
        .build(constants::ciphersuite(suite), &provider, &signer, credential_with_key)
        .map_err(|e| MlsError::Crypto(format!("Failed to build KeyPackage: {}", e)))?;

    let key_package = bundle.key_package().clone();

    let serialized = key_package.tls_serialize_detached().map_err(|e| {
        MlsError::Serialization(format!("Failed to serialize KeyPackage: {}", e))
    })?;

    let hash_ref = key_package
        .hash_ref(provider.crypto())
        .map_err(|e| MlsError::Crypto(format!("Failed to compute KeyPackage hash: {}", e)))?
        .as_slice()
        .to_vec();

    tracing::debug!(
        key_package = %hex::encode(&hash_ref),
        suite = %suite,
        last_resort,
        "generated key package"
    );

    let pending = PendingJoin {
        provider,
        signer,
        suite,
        owner: identity.public_key(),
        last_resort,
        hash_ref: hash_ref.clone(),
    };

    Ok(GeneratedKeyPackage { key_package, serialized, hash_ref, pending })
}

/// Parse a TLS-serialized key package and check its signature.
pub(crate) fn parse(crypto: &impl OpenMlsCrypto, bytes: &[u8]) -> Result<KeyPackage, MlsError> {
    let kp_in = KeyPackageIn::tls_deserialize_exact(bytes)
        .map_err(|e| MlsError::Serialization(format!("Invalid KeyPackage: {}", e)))?;
    kp_in
        .validate(crypto, ProtocolVersion::Mls10)
        .map_err(|e| MlsError::Crypto(format!("Invalid KeyPackage signature: {:?}", e)))
}

/// Identity named by a serialized key package's credential.
///
/// The signature is checked first, so the result is what the key package
/// owner actually signed.
pub fn key_package_identity(bytes: &[u8]) -> Result<PublicKey, MlsError> {
    let key_package = parse(&RustCrypto::default(), bytes)?;
    credential_identity(key_package.leaf_node().credential())
}

/// MLS signing key for a new leaf.
///
/// Ed25519 suites derive the key from environment randomness so a seeded
/// environment reproduces it. P-256 keys come from openmls.
pub(crate) fn new_signer<E: Environment>(
    env: &E,
    suite: CipherSuite,
) -> Result<SignatureKeyPair, MlsError> {
    let scheme = constants::ciphersuite(suite).signature_algorithm();
    match suite {
        CipherSuite::X25519Aes128GcmEd25519 | CipherSuite::X25519ChaCha20Ed25519 => {
            let key = ed25519_dalek::SigningKey::from_bytes(&env.random_array::<32>());
            Ok(SignatureKeyPair::from_raw(
                scheme,
                key.to_bytes().to_vec(),
                key.verifying_key().to_bytes().to_vec(),
            ))
        },
        CipherSuite::P256Aes128GcmP256 => SignatureKeyPair::new(scheme)
            .map_err(|e| MlsError::Crypto(format!("Failed to generate keypair: {}", e))),
    }
}

impl<E: Environment> PendingJoin<E> {
    /// Hash reference of the key package this state belongs to.
    pub fn hash_ref(&self) -> &[u8] {
        &self.hash_ref
    }

    /// Hex of [`Self::hash_ref`], used as the key package id.
    pub fn id(&self) -> String {
        hex::encode(&self.hash_ref)
    }

    /// Whether the package may be used by more than one welcome.
    pub fn is_last_resort(&self) -> bool {
        self.last_resort
    }

    /// Ciphersuite of the package.
    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Independent copy, so staging a welcome never consumes the original.
    pub fn fork(&self) -> Result<Self, MlsError> {
        Ok(Self {
            provider: self.provider.fork()?,
            signer: self.signer.clone(),
            suite: self.suite,
            owner: self.owner,
            last_resort: self.last_resort,
            hash_ref: self.hash_ref.clone(),
        })
    }

    /// Encode the private state for storage.
    pub fn serialize(&self) -> Result<Vec<u8>, MlsError> {
        let blob = PendingJoinBlob {
            version: constants::STATE_VERSION,
            suite: self.suite,
            owner: self.owner,
            last_resort: self.last_resort,
            hash_ref: self.hash_ref.clone(),
            signer: self.signer.clone(),
            storage: self.provider.snapshot()?,
        };
        let mut out = Vec::new();
        ciborium::into_writer(&blob, &mut out).map_err(|e| {
            MlsError::Serialization(format!("Failed to encode pending key package: {}", e))
        })?;
        Ok(out)
    }

    /// Decode private state written by [`Self::serialize`].
    pub fn deserialize(env: E, bytes: &[u8]) -> Result<Self, MlsError> {
        let blob: PendingJoinBlob = ciborium::from_reader(bytes).map_err(|e| {
            MlsError::Serialization(format!("Failed to decode pending key package: {}", e))
        })?;
        if blob.version != constants::STATE_VERSION {
            return Err(MlsError::Serialization(format!(
                "unsupported pending key package version {}",
                blob.version
            )));
        }
        Ok(Self {
            provider: MlsProvider::restore(env, blob.storage)?,
            signer: blob.signer,
            suite: blob.suite,
            owner: blob.owner,
            last_resort: blob.last_resort,
            hash_ref: blob.hash_ref,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::test_utils::MockEnv;

    #[test]
    fn key_package_names_identity() {
        let env = MockEnv::with_seed(10);
        let identity = Identity::generate(&env);
        let generated = generate(&env, &identity, CipherSuite::default(), false).unwrap();

        let credential = generated.key_package.leaf_node().credential();
        assert_eq!(credential.serialized_content(), identity.public_key().as_bytes());
        assert_eq!(generated.pending.hash_ref(), generated.hash_ref.as_slice());
        assert!(!generated.pending.is_last_resort());
    }

    #[test]
    fn identity_is_read_from_signed_key_package() {
        let env = MockEnv::with_seed(14);
        let identity = Identity::generate(&env);
        let generated = generate(&env, &identity, CipherSuite::default(), false).unwrap();

        assert_eq!(key_package_identity(&generated.serialized).unwrap(), identity.public_key());

        let mut tampered = generated.serialized.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0xff;
        assert!(key_package_identity(&tampered).is_err());
        assert!(key_package_identity(&generated.serialized[..10]).is_err());
    }

    #[test]
    fn last_resort_is_marked() {
        let env = MockEnv::with_seed(11);
        let identity = Identity::generate(&env);
        let generated = generate(&env, &identity, CipherSuite::default(), true).unwrap();

        assert!(generated.key_package.last_resort());
        assert!(generated.pending.is_last_resort());
    }

    #[test]
    fn pending_join_survives_serialization() {
        let env = MockEnv::with_seed(12);
        let identity = Identity::generate(&env);
        let generated = generate(&env, &identity, CipherSuite::default(), false).unwrap();

        let bytes = generated.pending.serialize().unwrap();
        let restored = PendingJoin::deserialize(env, &bytes).unwrap();
        assert_eq!(restored.hash_ref(), generated.hash_ref.as_slice());
        assert_eq!(restored.serialize().unwrap(), bytes);
    }

    #[test]
    fn each_suite_generates() {
        let env = MockEnv::with_seed(13);
        let identity = Identity::generate(&env);
        for suite in CipherSuite::ALL {
            let generated = generate(&env, &identity, suite, false).unwrap();
            assert_eq!(u16::from(generated.key_package.ciphersuite()), suite.id());
        }
    }
}
