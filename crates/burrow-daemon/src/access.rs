//! Local allow-list policy.
//!
//! Gates everything that arrives from other people: invitations are only
//! staged when their sender is the owner or an allow-listed contact, and
//! group messages are only processed for allow-listed groups. Groups the
//! owner creates or joins are allow-listed automatically.
//!
//! The policy lives in a JSON file that is rewritten, owner-only, on every
//! change:
//!
//! ```json
//! {
//!   "owner": "<64 hex>",
//!   "default_policy": "ignore",
//!   "allowed_contacts": ["<64 hex>"],
//!   "allowed_groups": ["<64 hex wire group id>"],
//!   "settings": { "audit_log": false }
//! }
//! ```

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use burrow_proto::PublicKey;
use serde::{Deserialize, Serialize};

use crate::{
    audit::AuditLog,
    error::{AccessError, ConfigError},
    store::write_atomic,
};

/// What happens to refused input besides the refusal itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultPolicy {
    /// Drop silently
    #[default]
    Ignore,
    /// Drop and emit a warning
    Log,
}

/// Optional behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessSettings {
    /// Record every decision in the daily audit log
    #[serde(default)]
    pub audit_log: bool,
}

/// On-disk policy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessControlConfig {
    /// Identity that is always allowed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<PublicKey>,
    /// Treatment of refused input
    #[serde(default)]
    pub default_policy: DefaultPolicy,
    /// Contacts allowed besides the owner
    #[serde(default)]
    pub allowed_contacts: Vec<PublicKey>,
    /// Wire group ids (hex)
    #[serde(default)]
    pub allowed_groups: Vec<String>,
    /// Optional behaviour
    #[serde(default)]
    pub settings: AccessSettings,
}

/// Loaded policy with write-through mutation.
#[derive(Debug)]
pub struct AccessControl {
    path: PathBuf,
    config: AccessControlConfig,
    owner: PublicKey,
    audit: Option<AuditLog>,
}

impl AccessControl {
    /// Load the policy at `path`, creating it if missing.
    ///
    /// `owner_override` (from `BURROW_OWNER_PUBKEY`) wins over the file.
    ///
    /// # Errors
    ///
    /// - `MissingOwner` if neither names an owner
    /// - `InvalidPolicy` if the file is not a valid policy
    pub fn open(path: impl Into<PathBuf>, owner_override: Option<PublicKey>) -> Result<Self, ConfigError> {
        let path = path.into();
        let (mut config, exists) = match fs::read(&path) {
            Ok(bytes) => {
                let config = serde_json::from_slice(&bytes).map_err(|e| ConfigError::InvalidPolicy {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
                (config, true)
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => (AccessControlConfig::default(), false),
            Err(source) => return Err(ConfigError::Io { path, source }),
        };

        let owner = owner_override
            .or(config.owner)
            .ok_or_else(|| ConfigError::MissingOwner(path.clone()))?;
        if config.owner.is_none() {
            config.owner = Some(owner);
        }

        let access = Self { path, config, owner, audit: None };
        if !exists {
            access.save()?;
            tracing::info!(path = %access.path.display(), owner = %owner, "created access policy");
        }
        Ok(access)
    }

    /// Record decisions in `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Whether the policy file asks for an audit log.
    pub fn audit_requested(&self) -> bool {
        self.config.settings.audit_log
    }

    /// Policy file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current policy.
    pub fn config(&self) -> &AccessControlConfig {
        &self.config
    }

    /// Effective owner.
    pub fn owner(&self) -> PublicKey {
        self.owner
    }

    /// Whether `id` is the owner.
    pub fn is_owner(&self, id: &PublicKey) -> bool {
        self.owner == *id
    }

    /// Whether `id` is the owner or allow-listed.
    pub fn is_contact_allowed(&self, id: &PublicKey) -> bool {
        self.is_owner(id) || self.config.allowed_contacts.contains(id)
    }

    /// Whether the wire group id is allow-listed.
    pub fn is_group_allowed(&self, group_id: &str) -> bool {
        self.config.allowed_groups.iter().any(|g| g.eq_ignore_ascii_case(group_id))
    }

    /// Refuse `id` unless allowed, applying the default policy.
    pub fn check_contact(&self, id: &PublicKey) -> Result<(), AccessError> {
        let allowed = self.is_contact_allowed(id);
        self.audit("contact", &id.to_hex(), allowed);
        if allowed {
            return Ok(());
        }
        if self.config.default_policy == DefaultPolicy::Log {
            tracing::warn!(contact = %id, "refused contact");
        }
        Err(AccessError::ContactDenied(*id))
    }

    /// Refuse `group_id` unless allowed, applying the default policy.
    pub fn check_group(&self, group_id: &str) -> Result<(), AccessError> {
        let allowed = self.is_group_allowed(group_id);
        self.audit("group", group_id, allowed);
        if allowed {
            return Ok(());
        }
        if self.config.default_policy == DefaultPolicy::Log {
            tracing::warn!(group = %group_id, "refused group");
        }
        Err(AccessError::GroupDenied(group_id.to_string()))
    }

    /// Allow-list a contact.
    pub fn add_contact(&mut self, id: PublicKey) -> Result<(), ConfigError> {
        if self.config.allowed_contacts.contains(&id) {
            return Ok(());
        }
        self.config.allowed_contacts.push(id);
        self.save()
    }

    /// Remove a contact from the allow-list.
    pub fn remove_contact(&mut self, id: &PublicKey) -> Result<(), ConfigError> {
        let before = self.config.allowed_contacts.len();
        self.config.allowed_contacts.retain(|c| c != id);
        if self.config.allowed_contacts.len() == before {
            return Ok(());
        }
        self.save()
    }

    /// Allow-list a group.
    pub fn add_group(&mut self, group_id: &str) -> Result<(), ConfigError> {
        if self.is_group_allowed(group_id) {
            return Ok(());
        }
        self.config.allowed_groups.push(group_id.to_ascii_lowercase());
        self.save()
    }

    /// Remove a group from the allow-list.
    pub fn remove_group(&mut self, group_id: &str) -> Result<(), ConfigError> {
        let before = self.config.allowed_groups.len();
        self.config.allowed_groups.retain(|g| !g.eq_ignore_ascii_case(group_id));
        if self.config.allowed_groups.len() == before {
            return Ok(());
        }
        self.save()
    }

    fn save(&self) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io { path: self.path.clone(), source };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let bytes = serde_json::to_vec_pretty(&self.config).map_err(|e| {
            ConfigError::InvalidPolicy { path: self.path.clone(), reason: e.to_string() }
        })?;
        write_atomic(&self.path, &bytes, true).map_err(io_error)
    }

    fn audit(&self, subject: &str, id: &str, allowed: bool) {
        if let Some(log) = &self.audit
            && let Err(e) = log.record(subject, id, allowed)
        {
            tracing::warn!(error = %e, "audit log write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn key(seed: u8) -> PublicKey {
        PublicKey::from_bytes([seed; 32])
    }

    #[test]
    fn missing_owner_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = AccessControl::open(dir.path().join("access.json"), None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingOwner(_)));
        assert!(!dir.path().join("access.json").exists());
    }

    #[test]
    fn owner_from_override_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.json");
        let access = AccessControl::open(&path, Some(key(1))).unwrap();

        assert!(access.is_owner(&key(1)));
        let reloaded = AccessControl::open(&path, None).unwrap();
        assert_eq!(reloaded.owner(), key(1));
    }

    #[test]
    fn override_wins_over_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.json");
        AccessControl::open(&path, Some(key(1))).unwrap();

        let access = AccessControl::open(&path, Some(key(2))).unwrap();
        assert!(access.is_owner(&key(2)));
        assert!(!access.is_owner(&key(1)));
    }

    #[test]
    fn contacts_and_groups() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.json");
        let mut access = AccessControl::open(&path, Some(key(1))).unwrap();

        assert!(access.is_contact_allowed(&key(1)));
        assert!(!access.is_contact_allowed(&key(2)));
        assert_eq!(access.check_contact(&key(2)), Err(AccessError::ContactDenied(key(2))));

        access.add_contact(key(2)).unwrap();
        access.add_contact(key(2)).unwrap();
        access.add_group("ABCD").unwrap();
        assert!(access.check_contact(&key(2)).is_ok());
        assert!(access.check_group("abcd").is_ok());

        let reloaded = AccessControl::open(&path, None).unwrap();
        assert_eq!(reloaded.config().allowed_contacts, vec![key(2)]);
        assert_eq!(reloaded.config().allowed_groups, vec!["abcd".to_string()]);

        access.remove_contact(&key(2)).unwrap();
        access.remove_group("abcd").unwrap();
        assert!(!access.is_contact_allowed(&key(2)));
        assert!(access.check_group("abcd").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn policy_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.json");
        AccessControl::open(&path, Some(key(1))).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn invalid_policy_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.json");
        fs::write(&path, r#"{"owner":"zz"}"#).unwrap();
        assert!(matches!(
            AccessControl::open(&path, Some(key(1))),
            Err(ConfigError::InvalidPolicy { .. })
        ));
    }

    #[test]
    fn decisions_are_audited() {
        let dir = TempDir::new().unwrap();
        let audit = AuditLog::open(dir.path().join("audit")).unwrap();
        let access = AccessControl::open(dir.path().join("access.json"), Some(key(1)))
            .unwrap()
            .with_audit(audit.clone());

        access.check_contact(&key(1)).unwrap();
        access.check_group("ab").unwrap_err();

        let files: Vec<_> = fs::read_dir(audit.dir()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let log = fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap();
        assert!(log.contains(&format!("contact {} allowed", key(1).to_hex())));
        assert!(log.contains("group ab denied"));
    }
}
