use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use serde::{Serialize, de::DeserializeOwned};

use super::{Store, StoredGroup, StoredKeyPackage, StoredMessage, check_id};
use crate::error::StoreError;

const GROUPS: &str = "groups";
const MLS_STATE: &str = "mls-state";
const KEY_PACKAGES: &str = "keypackages";
const MESSAGES: &str = "messages";

/// Flat-file store rooted at the data directory.
///
/// Every write goes to a temporary file that is renamed over the target, so
/// a crash leaves either the old or the new record, never a torn one. Files
/// holding secrets (MLS state, key packages) are owner-only on unix.
///
/// One daemon per data directory; concurrent writers are not detected.
#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io { path: path.to_path_buf(), source }
}

/// Write `bytes` to a sibling temp file and rename it over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8], private: bool) -> io::Result<()> {
    let tmp = path.with_extension("tmp");

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    if private {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    #[cfg(not(unix))]
    let _ = private;

    let mut file = options.open(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)
}

fn write_json<T: Serialize>(path: &Path, value: &T, private: bool) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| StoreError::Corrupt { path: path.to_path_buf(), reason: e.to_string() })?;
    write_atomic(path, &bytes, private).map_err(io_error(path))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let bytes = fs::read(path).map_err(io_error(path))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| StoreError::Corrupt { path: path.to_path_buf(), reason: e.to_string() })
}

/// `*.json` files in `dir`, sorted by name. A missing directory is empty.
fn json_files(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(dir)(e)),
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(io_error(dir))?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

impl FileStore {
    /// Open the store at `root`, creating its directories.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for dir in [GROUPS, MLS_STATE, KEY_PACKAGES, MESSAGES] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(io_error(&path))?;
        }
        Ok(Self { root })
    }

    /// Data directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record(&self, dir: &str, id: &str, ext: &str) -> Result<PathBuf, StoreError> {
        check_id(id)?;
        Ok(self.root.join(dir).join(format!("{id}.{ext}")))
    }
}

impl Store for FileStore {
    fn save_group(&self, group: &StoredGroup) -> Result<(), StoreError> {
        write_json(&self.record(GROUPS, &group.group_id, "json")?, group, false)
    }

    fn load_groups(&self) -> Result<Vec<StoredGroup>, StoreError> {
        json_files(&self.root.join(GROUPS))?.iter().map(|p| read_json(p)).collect()
    }

    fn save_mls_state(&self, group_id: &str, state: &[u8]) -> Result<(), StoreError> {
        let path = self.record(MLS_STATE, group_id, "bin")?;
        write_atomic(&path, state, true).map_err(io_error(&path))
    }

    fn load_mls_state(&self, group_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.record(MLS_STATE, group_id, "bin")?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path)(e)),
        }
    }

    fn save_key_package(&self, key_package: &StoredKeyPackage) -> Result<(), StoreError> {
        write_json(&self.record(KEY_PACKAGES, &key_package.id, "json")?, key_package, true)
    }

    fn load_key_packages(&self) -> Result<Vec<StoredKeyPackage>, StoreError> {
        json_files(&self.root.join(KEY_PACKAGES))?.iter().map(|p| read_json(p)).collect()
    }

    fn delete_key_package(&self, id: &str) -> Result<(), StoreError> {
        let path = self.record(KEY_PACKAGES, id, "json")?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path)(e)),
        }
    }

    fn save_message(&self, message: &StoredMessage) -> Result<(), StoreError> {
        check_id(&message.group_id)?;
        check_id(&message.id)?;
        let dir = self.root.join(MESSAGES).join(&message.group_id);
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;

        // Zero padding makes name order equal receive order
        let path = dir.join(format!("{:020}-{}.json", message.received_at, message.id));
        write_json(&path, message, false)
    }

    fn load_messages(&self, group_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        check_id(group_id)?;
        json_files(&self.root.join(MESSAGES).join(group_id))?.iter().map(|p| read_json(p)).collect()
    }
}
