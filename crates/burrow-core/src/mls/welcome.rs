//! Joining a group from a welcome.
//!
//! Joining is two-step: [`StagedJoin::stage`] decrypts the welcome and
//! exposes the group metadata so the user can decide, and
//! [`StagedJoin::into_group`] commits to the join. Staging works on a fork of
//! the pending key package state, so declining leaves the key package usable.

use burrow_proto::{CipherSuite, GroupMetadata, PublicKey};
use openmls::prelude::*;
use openmls_basic_credential::SignatureKeyPair;
use tls_codec::Deserialize as _;

use super::{
    constants,
    error::MlsError,
    group::{Group, credential_identity, read_metadata},
    key_package::PendingJoin,
    provider::MlsProvider,
};
use crate::env::Environment;

fn parse_welcome(bytes: &[u8]) -> Result<Welcome, MlsError> {
    let message = MlsMessageIn::tls_deserialize_exact(bytes)
        .map_err(|e| MlsError::Serialization(format!("Failed to deserialize Welcome: {}", e)))?;
    match message.extract() {
        MlsMessageBodyIn::Welcome(welcome) => Ok(welcome),
        _ => Err(MlsError::Serialization("Message is not a Welcome".to_string())),
    }
}

/// Hash references of every key package a welcome is encrypted to.
pub fn welcome_key_package_refs(bytes: &[u8]) -> Result<Vec<Vec<u8>>, MlsError> {
    let welcome = parse_welcome(bytes)?;
    Ok(welcome.secrets().iter().map(|secret| secret.new_member().as_slice().to_vec()).collect())
}

/// A decrypted welcome not yet turned into a group.
pub struct StagedJoin<E: Environment> {
    staged: StagedWelcome,
    provider: MlsProvider<E>,
    signer: SignatureKeyPair,
    suite: CipherSuite,
    own: PublicKey,
    metadata: GroupMetadata,
    members: Vec<PublicKey>,
}

impl<E: Environment> StagedJoin<E> {
    /// Decrypt `welcome` with the private state of `pending`.
    ///
    /// `pending` itself is not modified.
    pub fn stage(pending: &PendingJoin<E>, welcome: &[u8]) -> Result<Self, MlsError> {
        let refs = welcome_key_package_refs(welcome)?;
        if !refs.iter().any(|r| r.as_slice() == pending.hash_ref()) {
            return Err(MlsError::ProtocolState(format!(
                "welcome is not addressed to key package {}",
                pending.id()
            )));
        }

        let fork = pending.fork()?;
        let staged = StagedWelcome::new_from_welcome(
            &fork.provider,
            &constants::DEFAULT_JOIN_CONFIG,
            parse_welcome(welcome)?,
            None,
        )
        .map_err(|e| MlsError::Crypto(format!("Failed to stage Welcome: {}", e)))?;

        let metadata = read_metadata(staged.group_context().extensions())?;
        let members =
            staged.members().filter_map(|m| credential_identity(&m.credential).ok()).collect();

        tracing::debug!(
            group = %metadata.group_id_hex(),
            key_package = %pending.id(),
            "staged welcome"
        );

        Ok(Self {
            staged,
            provider: fork.provider,
            signer: fork.signer,
            suite: fork.suite,
            own: fork.owner,
            metadata,
            members,
        })
    }

    /// Metadata of the group being joined.
    pub fn metadata(&self) -> &GroupMetadata {
        &self.metadata
    }

    /// Member identities, including ours.
    pub fn members(&self) -> &[PublicKey] {
        &self.members
    }

    /// Number of members, including us.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Join the group.
    pub fn into_group(self) -> Result<Group<E>, MlsError> {
        let mls_group = self
            .staged
            .into_group(&self.provider)
            .map_err(|e| MlsError::Crypto(format!("Failed to join group from Welcome: {}", e)))?;

        let group = Group::from_parts(mls_group, self.signer, self.provider, self.suite, self.own)?;
        tracing::info!(
            group = %group.wire_group_id_hex(),
            epoch = group.epoch(),
            members = group.member_count(),
            "joined group"
        );
        Ok(group)
    }
}
