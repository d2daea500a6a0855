use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use super::{Store, StoredGroup, StoredKeyPackage, StoredMessage, check_id};
use crate::error::StoreError;

/// In-memory store for tests and relay-only operation.
///
/// All state is behind one `Arc<Mutex<_>>`, so clones share it. Ids are
/// validated exactly like [`super::FileStore`] does, so tests exercise the
/// same failure modes.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Default)]
struct MemoryStoreInner {
    groups: HashMap<String, StoredGroup>,
    mls_states: HashMap<String, Vec<u8>>,
    key_packages: HashMap<String, StoredKeyPackage>,
    /// Per group, keyed by (receive time, id) like the file names
    messages: HashMap<String, BTreeMap<(u64, String), StoredMessage>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for MemoryStore {
    fn save_group(&self, group: &StoredGroup) -> Result<(), StoreError> {
        check_id(&group.group_id)?;
        self.lock().groups.insert(group.group_id.clone(), group.clone());
        Ok(())
    }

    fn load_groups(&self) -> Result<Vec<StoredGroup>, StoreError> {
        Ok(self.lock().groups.values().cloned().collect())
    }

    fn save_mls_state(&self, group_id: &str, state: &[u8]) -> Result<(), StoreError> {
        check_id(group_id)?;
        self.lock().mls_states.insert(group_id.to_string(), state.to_vec());
        Ok(())
    }

    fn load_mls_state(&self, group_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        check_id(group_id)?;
        Ok(self.lock().mls_states.get(group_id).cloned())
    }

    fn save_key_package(&self, key_package: &StoredKeyPackage) -> Result<(), StoreError> {
        check_id(&key_package.id)?;
        self.lock().key_packages.insert(key_package.id.clone(), key_package.clone());
        Ok(())
    }

    fn load_key_packages(&self) -> Result<Vec<StoredKeyPackage>, StoreError> {
        Ok(self.lock().key_packages.values().cloned().collect())
    }

    fn delete_key_package(&self, id: &str) -> Result<(), StoreError> {
        check_id(id)?;
        self.lock().key_packages.remove(id);
        Ok(())
    }

    fn save_message(&self, message: &StoredMessage) -> Result<(), StoreError> {
        check_id(&message.group_id)?;
        check_id(&message.id)?;
        self.lock()
            .messages
            .entry(message.group_id.clone())
            .or_default()
            .insert((message.received_at, message.id.clone()), message.clone());
        Ok(())
    }

    fn load_messages(&self, group_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        check_id(group_id)?;
        Ok(self
            .lock()
            .messages
            .get(group_id)
            .map(|log| log.values().cloned().collect())
            .unwrap_or_default())
    }
}
