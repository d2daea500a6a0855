//! `OpenMLS` provider integration with the Environment abstraction.
//!
//! Bridges the `OpenMLS` provider pattern with the [`Environment`] trait so
//! every random draw openmls makes comes from the environment. Each group
//! and each pending key package owns its own provider; the storage snapshot
//! of that provider is what gets persisted.

use openmls_memory_storage::MemoryStorage;
use openmls_rust_crypto::RustCrypto;
use openmls_traits::{OpenMlsProvider, random::OpenMlsRand};

use super::error::MlsError;
use crate::env::Environment;

/// Key/value pairs of a provider's storage, sorted by key.
pub type StorageSnapshot = Vec<(Vec<u8>, Vec<u8>)>;

/// Burrow's `OpenMLS` provider that uses the Environment for RNG.
pub struct MlsProvider<E: Environment> {
    /// `OpenMLS` crypto provider (sync crypto operations)
    crypto: RustCrypto,

    /// RNG adapter wrapping our environment
    rand: EnvironmentRng<E>,

    /// In-memory storage, snapshotted for persistence
    storage: MemoryStorage,
}

impl<E: Environment> MlsProvider<E> {
    /// Provider with empty in-memory storage.
    pub fn new(env: E) -> Self {
        Self {
            crypto: RustCrypto::default(),
            rand: EnvironmentRng { env },
            storage: MemoryStorage::default(),
        }
    }

    /// Provider whose storage holds `entries`.
    pub fn restore(env: E, entries: StorageSnapshot) -> Result<Self, MlsError> {
        let provider = Self::new(env);
        provider
            .storage
            .values
            .write()
            .map_err(|_| MlsError::ProtocolState("storage lock poisoned".to_string()))?
            .extend(entries);
        Ok(provider)
    }

    /// Copy of every storage entry, sorted so equal states serialize equally.
    pub fn snapshot(&self) -> Result<StorageSnapshot, MlsError> {
        let values = self
            .storage
            .values
            .read()
            .map_err(|_| MlsError::ProtocolState("storage lock poisoned".to_string()))?;
        let mut entries: StorageSnapshot =
            values.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        entries.sort();
        Ok(entries)
    }

    /// Independent provider with a copy of this storage.
    pub fn fork(&self) -> Result<Self, MlsError> {
        Self::restore(self.rand.env.clone(), self.snapshot()?)
    }

    /// Environment this provider draws from.
    pub fn env(&self) -> &E {
        &self.rand.env
    }
}

/// RNG adapter that delegates to the Environment trait.
pub struct EnvironmentRng<E: Environment> {
    env: E,
}

impl<E: Environment> OpenMlsRand for EnvironmentRng<E> {
    type Error = std::convert::Infallible;

    fn random_array<const N: usize>(&self) -> Result<[u8; N], Self::Error> {
        Ok(self.env.random_array::<N>())
    }

    fn random_vec(&self, len: usize) -> Result<Vec<u8>, Self::Error> {
        let mut bytes = vec![0u8; len];
        self.env.random_bytes(&mut bytes);
        Ok(bytes)
    }
}

impl<E: Environment> OpenMlsProvider for MlsProvider<E> {
    type CryptoProvider = RustCrypto;
    type RandProvider = EnvironmentRng<E>;
    type StorageProvider = MemoryStorage;

    fn crypto(&self) -> &Self::CryptoProvider {
        &self.crypto
    }

    fn rand(&self) -> &Self::RandProvider {
        &self.rand
    }

    fn storage(&self) -> &Self::StorageProvider {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::test_utils::MockEnv;

    #[test]
    fn snapshot_restore_roundtrip() {
        let env = MockEnv::with_seed(0);
        let entries = vec![(b"b".to_vec(), b"2".to_vec()), (b"a".to_vec(), b"1".to_vec())];
        let provider = MlsProvider::restore(env, entries).unwrap();

        let snapshot = provider.snapshot().unwrap();
        assert_eq!(snapshot, vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())]);
        assert_eq!(provider.fork().unwrap().snapshot().unwrap(), snapshot);
    }
}
