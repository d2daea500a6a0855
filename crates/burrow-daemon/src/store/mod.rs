//! Persistence for the daemon.
//!
//! Synchronous trait over flat records. Each record is written on its own;
//! there are no cross-record transactions, so callers write the MLS state
//! before anything that refers to it.
//!
//! ```text
//! <data-dir>/
//!   groups/<group id>.json          StoredGroup
//!   mls-state/<group id>.bin        Group::serialize_state
//!   keypackages/<hash ref>.json     StoredKeyPackage (holds private material)
//!   messages/<group id>/<millis>-<event id>.json
//! ```

mod file;
mod memory;

pub(crate) use file::write_atomic;
pub use file::FileStore;
pub use memory::MemoryStore;
use burrow_proto::{CipherSuite, Event, PublicKey};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Public description of a group, kept next to its MLS state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredGroup {
    /// Wire group id (hex)
    pub group_id: String,
    /// MLS group id (hex)
    pub mls_group_id: String,
    /// Display name
    pub name: String,
    /// Description
    pub description: String,
    /// Admin identities
    pub admins: Vec<PublicKey>,
    /// Relays
    pub relays: Vec<String>,
    /// Epoch at the time of writing
    pub epoch: u64,
    /// Unix seconds of the last write
    pub updated_at: u64,
}

/// A key package we published and can still be invited with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKeyPackage {
    /// Hash reference (hex)
    pub id: String,
    /// Ciphersuite
    pub ciphersuite: CipherSuite,
    /// Reusable fallback package
    pub last_resort: bool,
    /// Signed announcement
    pub event: Event,
    /// Serialized `PendingJoin` (hex)
    pub pending: String,
    /// Unix seconds
    pub created_at: u64,
}

/// A decrypted chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Rumor id
    pub id: String,
    /// Wire group id (hex)
    pub group_id: String,
    /// Author identity
    pub sender: PublicKey,
    /// Message text
    pub content: String,
    /// Author timestamp, Unix seconds
    pub created_at: u64,
    /// Epoch the message was sent in
    pub epoch: u64,
    /// Local receive time, Unix milliseconds; orders the message log
    pub received_at: u64,
}

/// Storage for groups, key packages and messages.
///
/// Must be Clone (shared between the bridge and tests), Send + Sync, and
/// synchronous. Clones access the same underlying storage.
pub trait Store: Clone + Send + Sync + 'static {
    /// Write the public description of a group. Overwrites.
    fn save_group(&self, group: &StoredGroup) -> Result<(), StoreError>;

    /// Every stored group description. Order is not guaranteed.
    fn load_groups(&self) -> Result<Vec<StoredGroup>, StoreError>;

    /// Write the serialized MLS state of a group. Overwrites.
    fn save_mls_state(&self, group_id: &str, state: &[u8]) -> Result<(), StoreError>;

    /// Serialized MLS state of a group, `None` if never written.
    fn load_mls_state(&self, group_id: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a key package record. Overwrites.
    fn save_key_package(&self, key_package: &StoredKeyPackage) -> Result<(), StoreError>;

    /// Every stored key package. Order is not guaranteed.
    fn load_key_packages(&self) -> Result<Vec<StoredKeyPackage>, StoreError>;

    /// Remove a key package record. Removing a missing record is not an
    /// error.
    fn delete_key_package(&self, id: &str) -> Result<(), StoreError>;

    /// Append a message to its group's log.
    fn save_message(&self, message: &StoredMessage) -> Result<(), StoreError>;

    /// Messages of a group, oldest first by receive time.
    fn load_messages(&self, group_id: &str) -> Result<Vec<StoredMessage>, StoreError>;
}

/// Record ids become file names, so only hex is accepted.
pub(crate) fn check_id(id: &str) -> Result<(), StoreError> {
    if !id.is_empty() && id.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}
