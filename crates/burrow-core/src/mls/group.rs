//! Client-side MLS group state machine.
//!
//! One [`Group`] per joined group. The group owns its openmls provider, so
//! its whole state (tree, secrets, pending proposals) is the provider storage
//! plus a handful of local fields, and [`Group::serialize_state`] is an exact
//! snapshot of it.

use burrow_proto::{CipherSuite, GROUP_METADATA_EXTENSION_TYPE, GroupMetadata, PublicKey};
use openmls::prelude::{MlsMessageIn, *};
use openmls_basic_credential::SignatureKeyPair;
use openmls_traits::OpenMlsProvider;
use tls_codec::{Deserialize as _, Serialize as _};

use super::{
    constants,
    error::MlsError,
    key_package::{self, new_signer},
    provider::{MlsProvider, StorageSnapshot},
};
use crate::{env::Environment, identity::Identity};

/// Parameters for [`Group::create`].
#[derive(Debug, Clone, Default)]
pub struct GroupConfig {
    /// Display name
    pub name: String,
    /// Description
    pub description: String,
    /// Relays the group publishes to
    pub relays: Vec<String>,
    /// Admins besides the creator
    pub admins: Vec<PublicKey>,
    /// Ciphersuite
    pub suite: CipherSuite,
}

/// A membership change to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proposal {
    /// Add members from TLS-serialized key packages
    Add(Vec<Vec<u8>>),
    /// Remove members by identity
    Remove(Vec<PublicKey>),
    /// Rotate our own leaf key
    Update,
}

/// Output of [`Group::commit`].
#[derive(Debug, Clone)]
pub struct CommitResult {
    /// TLS-serialized commit for the existing members
    pub commit: Vec<u8>,
    /// TLS-serialized welcome, present when members were added
    pub welcome: Option<Vec<u8>>,
    /// Identities the welcome must be delivered to
    pub recipients: Vec<PublicKey>,
    /// Epoch the commit creates once merged
    pub target_epoch: u64,
}

/// Outcome of [`Group::process_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessResult {
    /// Decrypted application message
    Application {
        /// Author identity
        sender: PublicKey,
        /// Message bytes
        plaintext: Vec<u8>,
    },
    /// Proposal stored for a later commit
    Proposal {
        /// Proposer identity
        sender: PublicKey,
    },
    /// Commit merged; the group is at a new epoch
    Commit {
        /// Committer identity
        sender: PublicKey,
        /// Epoch after the merge
        epoch: u64,
        /// False when the commit removed us
        active: bool,
    },
}

/// Tracks a commit we created that waits for confirmation.
#[derive(Debug, Clone, Copy)]
struct PendingCommit {
    /// Epoch this commit will create when merged
    target_epoch: u64,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct GroupStateBlob {
    version: u16,
    mls_group_id: Vec<u8>,
    own: PublicKey,
    suite: CipherSuite,
    signer: SignatureKeyPair,
    pending_target_epoch: Option<u64>,
    storage: StorageSnapshot,
}

/// Client-side MLS group.
///
/// # Invariants
///
/// - Epoch only increases
/// - At most one local commit is pending; while it is, no further commit or
///   application message is created
/// - `metadata` always mirrors the group context extension of the current
///   epoch
pub struct Group<E: Environment> {
    /// openmls group instance
    mls_group: MlsGroup,

    /// Our MLS signature keypair for this group
    signer: SignatureKeyPair,

    /// Provider for crypto, storage and RNG
    provider: MlsProvider<E>,

    /// Ciphersuite
    suite: CipherSuite,

    /// Our identity
    own: PublicKey,

    /// Decoded metadata extension
    metadata: GroupMetadata,

    /// Commit we created that has not been merged yet
    pending_commit: Option<PendingCommit>,
}

/// Metadata from the group context extensions.
pub(crate) fn read_metadata(extensions: &Extensions) -> Result<GroupMetadata, MlsError> {
    let raw = extensions
        .iter()
        .find_map(|ext| match ext {
            Extension::Unknown(ext_type, UnknownExtension(data))
                if *ext_type == GROUP_METADATA_EXTENSION_TYPE =>
            {
                Some(data)
            },
            _ => None,
        })
        .ok_or_else(|| MlsError::ProtocolState("group has no metadata extension".to_string()))?;
    Ok(GroupMetadata::decode(raw)?)
}

/// Identity named by a basic credential.
pub(crate) fn credential_identity(credential: &Credential) -> Result<PublicKey, MlsError> {
    Ok(PublicKey::from_slice(credential.serialized_content())?)
}

impl<E: Environment> Group<E> {
    /// Create a group with `identity` as its only member, at epoch 0.
    ///
    /// The MLS group id and the wire group id are independent random values.
    /// The creator is always the first admin. Returns the group and its
    /// serialized state, ready to persist.
    pub fn create(
        env: &E,
        identity: &Identity,
        config: GroupConfig,
    ) -> Result<(Self, Vec<u8>), MlsError> {
        let mls_group_id = env.random_array::<32>();
        let wire_group_id = env.random_array::<32>();
        let provider = MlsProvider::new(env.clone());
        let signer = new_signer(env, config.suite)?;
        let own = identity.public_key();

        let mut admins = vec![own];
        for admin in config.admins {
            if !admins.contains(&admin) {
                admins.push(admin);
            }
        }

        let metadata = GroupMetadata::new(
            wire_group_id,
            config.name,
            config.description,
            admins,
            config.relays,
        );

        let extensions = Extensions::from_vec(vec![
            Extension::Unknown(GROUP_METADATA_EXTENSION_TYPE, UnknownExtension(metadata.encode()?)),
            Extension::RequiredCapabilities(RequiredCapabilitiesExtension::new(
                &[ExtensionType::Unknown(GROUP_METADATA_EXTENSION_TYPE)],
                &[],
                &[],
            )),
        ])
        .map_err(|e| MlsError::Crypto(format!("Failed to build group extensions: {}", e)))?;

        let credential_with_key = CredentialWithKey {
            credential: identity.credential().into(),
            signature_key: signer.public().into(),
        };

        let mls_group = MlsGroup::builder()
            .ciphersuite(constants::ciphersuite(config.suite))
            .with_group_id(GroupId::from_slice(&mls_group_id))
            .use_ratchet_tree_extension(true)
            .with_capabilities(constants::capabilities(config.suite))
            .with_group_context_extensions(extensions)
            .map_err(|e| MlsError::Crypto(format!("Invalid group extensions: {}", e)))?
            .build(&provider, &signer, credential_with_key)
            .map_err(|e| MlsError::Crypto(format!("Failed to create MLS group: {}", e)))?;

        let group = Self {
            mls_group,
            signer,
            provider,
            suite: config.suite,
            own,
            metadata,
            pending_commit: None,
        };

        tracing::info!(group = %group.wire_group_id_hex(), name = %group.metadata.name, "created group");

        let state = group.serialize_state()?;
        Ok((group, state))
    }

    pub(crate) fn from_parts(
        mls_group: MlsGroup,
        signer: SignatureKeyPair,
        provider: MlsProvider<E>,
        suite: CipherSuite,
        own: PublicKey,
    ) -> Result<Self, MlsError> {
        let metadata = read_metadata(mls_group.extensions())?;
        Ok(Self { mls_group, signer, provider, suite, own, metadata, pending_commit: None })
    }

    /// MLS epoch number (increments on every merged commit).
    pub fn epoch(&self) -> u64 {
        self.mls_group.epoch().as_u64()
    }

    /// Decoded group metadata.
    pub fn metadata(&self) -> &GroupMetadata {
        &self.metadata
    }

    /// Wire group id, carried in metadata and in `h` tags.
    pub fn wire_group_id(&self) -> [u8; 32] {
        self.metadata.group_id
    }

    /// Hex of [`Self::wire_group_id`].
    pub fn wire_group_id_hex(&self) -> String {
        self.metadata.group_id_hex()
    }

    /// MLS group id.
    pub fn mls_group_id(&self) -> &[u8] {
        self.mls_group.group_id().as_slice()
    }

    /// Hex of [`Self::mls_group_id`].
    pub fn mls_group_id_hex(&self) -> String {
        hex::encode(self.mls_group_id())
    }

    /// Ciphersuite.
    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Our identity.
    pub fn own_identity(&self) -> PublicKey {
        self.own
    }

    /// Member identities in leaf order.
    pub fn members(&self) -> Vec<PublicKey> {
        self.mls_group.members().filter_map(|m| credential_identity(&m.credential).ok()).collect()
    }

    /// Number of members.
    pub fn member_count(&self) -> usize {
        self.mls_group.members().count()
    }

    /// Whether a local commit awaits [`Self::merge_pending_commit`].
    pub fn has_pending_commit(&self) -> bool {
        self.pending_commit.is_some()
    }

    /// False once a processed commit removed us.
    pub fn is_active(&self) -> bool {
        self.mls_group.is_active()
    }

    /// Create a commit for `proposal`.
    ///
    /// The group is pending until [`Self::merge_pending_commit`]. Adding and
    /// removing members requires admin rights; removing ourselves is refused.
    pub fn commit(&mut self, proposal: Proposal) -> Result<CommitResult, MlsError> {
        if let Some(pending) = self.pending_commit {
            return Err(MlsError::PendingCommit { target_epoch: pending.target_epoch });
        }

        let target_epoch = self.epoch() + 1;
        let result = match proposal {
            Proposal::Add(key_packages) => self.commit_add(&key_packages, target_epoch)?,
            Proposal::Remove(members) => self.commit_remove(&members, target_epoch)?,
            Proposal::Update => self.commit_update(target_epoch)?,
        };

        self.pending_commit = Some(PendingCommit { target_epoch });
        Ok(result)
    }

    /// Commit adding a single member.
    pub fn add_member(&mut self, key_package: Vec<u8>) -> Result<CommitResult, MlsError> {
        self.commit(Proposal::Add(vec![key_package]))
    }

    fn require_admin(&self) -> Result<(), MlsError> {
        if self.metadata.is_admin(&self.own) {
            Ok(())
        } else {
            Err(MlsError::NotAdmin(self.own))
        }
    }

    fn commit_add(
        &mut self,
        key_packages_bytes: &[Vec<u8>],
        target_epoch: u64,
    ) -> Result<CommitResult, MlsError> {
        self.require_admin()?;
        if key_packages_bytes.is_empty() {
            return Err(MlsError::ProtocolState("no key packages to add".to_string()));
        }

        let key_packages: Vec<KeyPackage> = key_packages_bytes
            .iter()
            .map(|bytes| key_package::parse(self.provider.crypto(), bytes))
            .collect::<Result<Vec<_>, MlsError>>()?;

        let recipients = key_packages
            .iter()
            .map(|kp| credential_identity(kp.leaf_node().credential()))
            .collect::<Result<Vec<_>, MlsError>>()?;

        let (commit, welcome, _group_info) = self
            .mls_group
            .add_members(&self.provider, &self.signer, &key_packages)
            .map_err(|e| MlsError::Crypto(format!("Failed to add members: {}", e)))?;

        let commit = commit
            .tls_serialize_detached()
            .map_err(|e| MlsError::Serialization(format!("Failed to serialize commit: {}", e)))?;
        let welcome = welcome
            .tls_serialize_detached()
            .map_err(|e| MlsError::Serialization(format!("Failed to serialize welcome: {}", e)))?;

        tracing::debug!(
            group = %self.wire_group_id_hex(),
            target_epoch,
            added = recipients.len(),
            "created add commit"
        );

        Ok(CommitResult { commit, welcome: Some(welcome), recipients, target_epoch })
    }

    fn commit_remove(
        &mut self,
        members: &[PublicKey],
        target_epoch: u64,
    ) -> Result<CommitResult, MlsError> {
        self.require_admin()?;
        if members.is_empty() {
            return Err(MlsError::ProtocolState("no members specified for removal".to_string()));
        }
        if members.contains(&self.own) {
            return Err(MlsError::ProtocolState("cannot remove self".to_string()));
        }

        let leaf_indices = self.leaf_indices(members)?;

        let (commit, _welcome, _group_info) = self
            .mls_group
            .remove_members(&self.provider, &self.signer, &leaf_indices)
            .map_err(|e| MlsError::Crypto(format!("Failed to remove members: {}", e)))?;

        let commit = commit
            .tls_serialize_detached()
            .map_err(|e| MlsError::Serialization(format!("Failed to serialize commit: {}", e)))?;

        tracing::debug!(
            group = %self.wire_group_id_hex(),
            target_epoch,
            removed = members.len(),
            "created remove commit"
        );

        Ok(CommitResult { commit, welcome: None, recipients: Vec::new(), target_epoch })
    }

    fn commit_update(&mut self, target_epoch: u64) -> Result<CommitResult, MlsError> {
        let bundle = self
            .mls_group
            .self_update(&self.provider, &self.signer, LeafNodeParameters::default())
            .map_err(|e| MlsError::Crypto(format!("Failed to update own leaf: {}", e)))?;

        let commit = bundle
            .commit()
            .tls_serialize_detached()
            .map_err(|e| MlsError::Serialization(format!("Failed to serialize commit: {}", e)))?;

        tracing::debug!(group = %self.wire_group_id_hex(), target_epoch, "created update commit");

        Ok(CommitResult { commit, welcome: None, recipients: Vec::new(), target_epoch })
    }

    /// Map identities to their leaf indices.
    fn leaf_indices(&self, members: &[PublicKey]) -> Result<Vec<LeafNodeIndex>, MlsError> {
        members
            .iter()
            .map(|target| {
                self.mls_group
                    .members()
                    .find(|m| credential_identity(&m.credential).is_ok_and(|id| id == *target))
                    .map(|m| m.index)
                    .ok_or_else(|| MlsError::ProtocolState(format!("{} is not a member", target)))
            })
            .collect()
    }

    /// Drop our pending commit without merging it. The epoch is unchanged
    /// and new commits and sends are allowed again.
    pub fn discard_pending_commit(&mut self) -> Result<(), MlsError> {
        if self.pending_commit.take().is_none() {
            return Err(MlsError::ProtocolState("no pending commit to discard".to_string()));
        }
        self.mls_group
            .clear_pending_commit(self.provider.storage())
            .map_err(|e| MlsError::Crypto(format!("Failed to clear pending commit: {:?}", e)))?;

        tracing::debug!(group = %self.wire_group_id_hex(), epoch = self.epoch(), "discarded pending commit");
        Ok(())
    }

    /// Merge our pending commit. The epoch advances by one.
    pub fn merge_pending_commit(&mut self) -> Result<u64, MlsError> {
        let expected_epoch = self
            .pending_commit
            .map(|p| p.target_epoch)
            .ok_or_else(|| MlsError::ProtocolState("no pending commit to merge".to_string()))?;

        self.mls_group
            .merge_pending_commit(&self.provider)
            .map_err(|e| MlsError::Crypto(format!("Failed to merge pending commit: {}", e)))?;

        let actual_epoch = self.epoch();
        debug_assert_eq!(
            actual_epoch, expected_epoch,
            "Epoch after merge ({}) doesn't match expected ({})",
            actual_epoch, expected_epoch
        );

        self.pending_commit = None;
        self.metadata = read_metadata(self.mls_group.extensions())?;

        tracing::info!(
            group = %self.wire_group_id_hex(),
            epoch = actual_epoch,
            members = self.member_count(),
            "merged pending commit"
        );

        Ok(actual_epoch)
    }

    /// Encrypt an application message for the current epoch.
    ///
    /// Advances the sending ratchet, so the caller persists the state along
    /// with the ciphertext.
    pub fn create_application_message(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, MlsError> {
        if let Some(pending) = self.pending_commit {
            return Err(MlsError::PendingCommit { target_epoch: pending.target_epoch });
        }

        let message = self
            .mls_group
            .create_message(&self.provider, &self.signer, plaintext)
            .map_err(|e| MlsError::Crypto(format!("Failed to create message: {}", e)))?;

        message
            .tls_serialize_detached()
            .map_err(|e| MlsError::Serialization(format!("Failed to serialize message: {}", e)))
    }

    /// Process an incoming MLS message (commit, proposal or application).
    ///
    /// Commits are merged immediately. A commit from another member replaces
    /// any commit of ours that was still pending.
    pub fn process_message(&mut self, bytes: &[u8]) -> Result<ProcessResult, MlsError> {
        let mls_message = MlsMessageIn::tls_deserialize_exact(bytes).map_err(|e| {
            MlsError::Serialization(format!("Failed to deserialize MLS message: {}", e))
        })?;

        let protocol_message: ProtocolMessage = mls_message
            .try_into()
            .map_err(|e| MlsError::Serialization(format!("Invalid MLS message type: {:?}", e)))?;

        let processed = self
            .mls_group
            .process_message(&self.provider, protocol_message)
            .map_err(|e| MlsError::Crypto(format!("Failed to process message: {}", e)))?;

        let sender = credential_identity(processed.credential())?;

        match processed.into_content() {
            ProcessedMessageContent::ApplicationMessage(app_msg) => {
                Ok(ProcessResult::Application { sender, plaintext: app_msg.into_bytes() })
            },
            ProcessedMessageContent::ProposalMessage(proposal) => {
                self.mls_group
                    .store_pending_proposal(self.provider.storage(), *proposal)
                    .map_err(|e| MlsError::Crypto(format!("Failed to store proposal: {}", e)))?;
                tracing::debug!(group = %self.wire_group_id_hex(), %sender, "stored proposal");
                Ok(ProcessResult::Proposal { sender })
            },
            ProcessedMessageContent::ExternalJoinProposalMessage(proposal) => {
                self.mls_group
                    .store_pending_proposal(self.provider.storage(), *proposal)
                    .map_err(|e| MlsError::Crypto(format!("Failed to store proposal: {}", e)))?;
                Ok(ProcessResult::Proposal { sender })
            },
            ProcessedMessageContent::StagedCommitMessage(staged_commit) => {
                let old_epoch = self.epoch();

                self.mls_group
                    .merge_staged_commit(&self.provider, *staged_commit)
                    .map_err(|e| MlsError::Crypto(format!("Failed to merge commit: {}", e)))?;

                let epoch = self.epoch();
                debug_assert!(
                    epoch > old_epoch,
                    "invariant: epoch must increase after commit ({} -> {})",
                    old_epoch,
                    epoch
                );

                self.pending_commit = None;
                let active = self.mls_group.is_active();
                if active {
                    self.metadata = read_metadata(self.mls_group.extensions())?;
                }

                tracing::info!(group = %self.wire_group_id_hex(), %sender, epoch, active, "applied commit");
                Ok(ProcessResult::Commit { sender, epoch, active })
            },
        }
    }

    /// Derive a secret from the current epoch's key schedule.
    pub fn export_secret(
        &self,
        label: &str,
        context: &[u8],
        length: usize,
    ) -> Result<Vec<u8>, MlsError> {
        self.mls_group
            .export_secret(self.provider.crypto(), label, context, length)
            .map_err(|e| MlsError::Crypto(format!("Failed to export secret: {}", e)))
    }

    /// Key for the group message cipher in the current epoch.
    pub fn exporter_key(&self) -> Result<[u8; 32], MlsError> {
        let secret = zeroize::Zeroizing::new(self.export_secret(
            constants::EXPORTER_LABEL,
            constants::EXPORTER_CONTEXT,
            constants::EXPORTER_LENGTH,
        )?);
        secret
            .as_slice()
            .try_into()
            .map_err(|_| MlsError::Crypto("exporter secret has unexpected length".to_string()))
    }

    /// Exact snapshot of the group state.
    pub fn serialize_state(&self) -> Result<Vec<u8>, MlsError> {
        let blob = GroupStateBlob {
            version: constants::STATE_VERSION,
            mls_group_id: self.mls_group_id().to_vec(),
            own: self.own,
            suite: self.suite,
            signer: self.signer.clone(),
            pending_target_epoch: self.pending_commit.map(|p| p.target_epoch),
            storage: self.provider.snapshot()?,
        };
        let mut out = Vec::new();
        ciborium::into_writer(&blob, &mut out)
            .map_err(|e| MlsError::Serialization(format!("Failed to encode group state: {}", e)))?;
        Ok(out)
    }

    /// Restore a group written by [`Self::serialize_state`].
    ///
    /// The join configuration is not part of the snapshot; every restored
    /// group runs with [`constants::DEFAULT_JOIN_CONFIG`].
    pub fn deserialize_state(env: E, bytes: &[u8]) -> Result<Self, MlsError> {
        let blob: GroupStateBlob = ciborium::from_reader(bytes)
            .map_err(|e| MlsError::Serialization(format!("Failed to decode group state: {}", e)))?;
        if blob.version != constants::STATE_VERSION {
            return Err(MlsError::Serialization(format!(
                "unsupported group state version {}",
                blob.version
            )));
        }

        let provider = MlsProvider::restore(env, blob.storage)?;
        let mut mls_group = MlsGroup::load(provider.storage(), &GroupId::from_slice(&blob.mls_group_id))
            .map_err(|e| MlsError::Serialization(format!("Failed to load group: {}", e)))?
            .ok_or_else(|| MlsError::ProtocolState("group state not found in snapshot".to_string()))?;

        mls_group
            .set_configuration(provider.storage(), &constants::DEFAULT_JOIN_CONFIG)
            .map_err(|e| MlsError::Serialization(format!("Failed to set join config: {}", e)))?;

        let mut group = Self::from_parts(mls_group, blob.signer, provider, blob.suite, blob.own)?;
        group.pending_commit =
            blob.pending_target_epoch.map(|target_epoch| PendingCommit { target_epoch });
        Ok(group)
    }
}
