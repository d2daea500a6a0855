//! Command handling for one worker.
//!
//! The [`Bridge`] owns the identity, every loaded group, the private half of
//! every published key package and the invitations staged but not yet
//! accepted. It handles one [`Command`] or one network event at a time, to
//! completion, and persists every state change before it returns.
//!
//! # Invariants
//!
//! - Group state is written to the store before the response that reports
//!   it, and before any envelope derived from it is published
//! - A non-last-resort key package is deleted as soon as a welcome for it is
//!   accepted, together with every other invitation staged against it
//! - Events this worker published are never processed when they come back
//!   from a relay

use std::collections::HashMap;

use burrow_core::{
    Environment, Group, GroupConfig, Identity, PendingJoin, ProcessResult, Proposal, StagedJoin,
    identity::x25519_public,
    mls::{key_package, key_package_identity, welcome_key_package_refs},
};
use burrow_proto::{
    CipherSuite, Command, Event, Filter, GroupSummary, PublicKey, Response, kinds,
};
use burrow_relay::{
    EnvelopeError, RelayPool, Subscription,
    envelope::{
        chat_rumor, gift_wrap, group_id_of, group_message_event, key_package_event,
        open_group_message, open_key_package, open_welcome_rumor, unwrap_gift, welcome_rumor,
    },
};

use crate::{
    access::AccessControl,
    error::BridgeError,
    seen::SeenEvents,
    store::{Store, StoredGroup, StoredKeyPackage, StoredMessage},
};

/// Invitation decrypted by `process_welcome`, waiting for `accept_welcome`.
struct StagedInvite<E: Environment> {
    join: StagedJoin<E>,
    key_package_id: String,
    last_resort: bool,
    inviter: PublicKey,
}

fn summary<E: Environment>(group: &Group<E>) -> GroupSummary {
    let metadata = group.metadata();
    GroupSummary {
        group_id: group.wire_group_id_hex(),
        mls_group_id: group.mls_group_id_hex(),
        name: metadata.name.clone(),
        description: metadata.description.clone(),
        admins: metadata.admins.clone(),
        relays: metadata.relays.clone(),
        epoch: group.epoch(),
        members: group.members(),
        pending_commit: group.has_pending_commit(),
    }
}

/// Write the MLS state first, then the description that refers to it.
fn persist<E: Environment, S: Store>(
    store: &S,
    group: &Group<E>,
    now: u64,
) -> Result<(), BridgeError> {
    let group_id = group.wire_group_id_hex();
    store.save_mls_state(&group_id, &group.serialize_state()?)?;

    let metadata = group.metadata();
    store.save_group(&StoredGroup {
        group_id,
        mls_group_id: group.mls_group_id_hex(),
        name: metadata.name.clone(),
        description: metadata.description.clone(),
        admins: metadata.admins.clone(),
        relays: metadata.relays.clone(),
        epoch: group.epoch(),
        updated_at: now,
    })?;
    Ok(())
}

fn not_found(group_id: &str) -> BridgeError {
    BridgeError::UnknownGroup(group_id.to_string())
}

/// Protocol state of one worker.
pub struct Bridge<E: Environment, S: Store> {
    env: E,
    identity: Identity,
    store: S,
    access: AccessControl,
    pool: Option<RelayPool>,

    /// Loaded groups by wire group id (lowercase hex)
    groups: HashMap<String, Group<E>>,

    /// Private key package state by hash ref (hex)
    pending_joins: HashMap<String, PendingJoin<E>>,

    /// Staged invitations by welcome rumor id
    staged: HashMap<String, StagedInvite<E>>,

    /// Gift wraps held back until the commit that created them is merged
    held_welcomes: HashMap<String, Vec<Event>>,

    /// Ids of events we published or already ingested, oldest evicted first
    seen: SeenEvents,

    /// Unix seconds at startup; older group traffic is not replayed
    started_at: u64,

    /// Set when the group set changed and the subscription is stale
    resubscribe: bool,
}

impl<E: Environment, S: Store> Bridge<E, S> {
    /// Worker for `identity`, restoring groups and key packages from `store`.
    ///
    /// Records that cannot be restored (corrupt, or belonging to another
    /// identity) are skipped with a warning.
    pub fn new(
        env: E,
        identity: Identity,
        store: S,
        access: AccessControl,
        pool: Option<RelayPool>,
    ) -> Result<Self, BridgeError> {
        let started_at = env.wall_clock_secs();
        let mut bridge = Self {
            env,
            identity,
            store,
            access,
            pool,
            groups: HashMap::new(),
            pending_joins: HashMap::new(),
            staged: HashMap::new(),
            held_welcomes: HashMap::new(),
            seen: SeenEvents::default(),
            started_at,
            resubscribe: true,
        };
        bridge.restore()?;
        Ok(bridge)
    }

    fn restore(&mut self) -> Result<(), BridgeError> {
        let own = self.identity.public_key();

        for stored in self.store.load_groups()? {
            let Some(state) = self.store.load_mls_state(&stored.group_id)? else {
                tracing::warn!(group = %stored.group_id, "group has no MLS state, skipping");
                continue;
            };
            match Group::deserialize_state(self.env.clone(), &state) {
                Ok(group) if group.own_identity() == own => {
                    self.groups.insert(group.wire_group_id_hex(), group);
                },
                Ok(group) => {
                    tracing::warn!(
                        group = %stored.group_id,
                        owner = %group.own_identity(),
                        "group belongs to another identity, skipping"
                    );
                },
                Err(e) => {
                    tracing::warn!(group = %stored.group_id, error = %e, "corrupt group state, skipping");
                },
            }
        }

        for stored in self.store.load_key_packages()? {
            let pending = hex::decode(&stored.pending)
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    PendingJoin::deserialize(self.env.clone(), &bytes).map_err(|e| e.to_string())
                });
            match pending {
                Ok(pending) => {
                    self.seen.insert(&stored.event.id);
                    self.pending_joins.insert(stored.id, pending);
                },
                Err(e) => {
                    tracing::warn!(key_package = %stored.id, error = %e, "corrupt key package, skipping");
                },
            }
        }

        tracing::info!(
            groups = self.groups.len(),
            key_packages = self.pending_joins.len(),
            "restored state"
        );
        Ok(())
    }

    /// Identity of this worker.
    pub fn public_key(&self) -> PublicKey {
        self.identity.public_key()
    }

    /// Access policy.
    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    /// Handle one command. Failures become error responses.
    pub async fn handle(&mut self, command: Command) -> Response {
        let name = command.name();
        match self.execute(command).await {
            Ok(response) => {
                tracing::debug!(command = name, "command handled");
                response
            },
            Err(e) => {
                tracing::warn!(command = name, error = %e, "command failed");
                Response::error(e)
            },
        }
    }

    /// Handle an event delivered by a relay subscription.
    ///
    /// Results are persisted and logged; nothing is reported to the
    /// controller.
    pub async fn ingest(&mut self, event: Event) {
        if !self.seen.insert(&event.id) {
            return;
        }

        let id = event.id.clone();
        let command = match event.kind {
            kinds::GIFT_WRAP => Command::ProcessWelcome { event },
            kinds::GROUP_MESSAGE => Command::ProcessMessage { event },
            kind => {
                tracing::debug!(event = %id, kind, "ignoring network event");
                return;
            },
        };

        let name = command.name();
        match self.execute(command).await {
            Ok(Response::WelcomePending { welcome_id, group_id, inviter, .. }) => {
                tracing::info!(%welcome_id, group = %group_id, %inviter, "invitation received");
            },
            Ok(_) => tracing::info!(event = %id, command = name, "network event processed"),
            Err(e) => tracing::debug!(event = %id, command = name, error = %e, "network event dropped"),
        }
    }

    /// Filters covering invitations to us and traffic of every loaded group.
    pub fn subscription_filters(&self) -> Vec<Filter> {
        let mut filters =
            vec![Filter::new().kind(kinds::GIFT_WRAP).recipient(self.identity.public_key())];
        if !self.groups.is_empty() {
            let mut traffic = Filter::new().kind(kinds::GROUP_MESSAGE).since(self.started_at);
            for group_id in self.groups.keys() {
                traffic = traffic.group(group_id.clone());
            }
            filters.push(traffic);
        }
        filters
    }

    /// Whether the group set changed since the last [`Self::subscribe`].
    pub fn needs_resubscribe(&self) -> bool {
        self.resubscribe && self.pool.is_some()
    }

    /// Open a subscription for [`Self::subscription_filters`].
    ///
    /// `None` without relays, or when no relay could be reached.
    pub async fn subscribe(&mut self) -> Option<Subscription> {
        self.resubscribe = false;
        let pool = self.pool.as_ref()?;
        match pool.subscribe(self.subscription_filters()).await {
            Ok(subscription) => {
                tracing::debug!(groups = self.groups.len(), "subscribed");
                Some(subscription)
            },
            Err(e) => {
                tracing::warn!(error = %e, "subscription failed");
                None
            },
        }
    }

    async fn execute(&mut self, command: Command) -> Result<Response, BridgeError> {
        match command {
            Command::Keygen { last_resort, ciphersuite } => {
                self.keygen(last_resort, ciphersuite).await
            },
            Command::CreateGroup { name, description, relays, admins, ciphersuite } => self
                .create_group(GroupConfig { name, description, relays, admins, suite: ciphersuite }),
            Command::MergePendingCommit { group_id } => self.merge_pending_commit(&group_id).await,
            Command::AddMembers { group_id, key_packages } => {
                self.add_members(&group_id, &key_packages).await
            },
            Command::RemoveMembers { group_id, members } => {
                self.commit(&group_id, Proposal::Remove(members), &HashMap::new()).await
            },
            Command::SelfUpdate { group_id } => {
                self.commit(&group_id, Proposal::Update, &HashMap::new()).await
            },
            Command::ListGroups => Ok(self.list_groups()),
            Command::ProcessWelcome { event } => self.process_welcome(event),
            Command::AcceptWelcome { welcome_id } => self.accept_welcome(&welcome_id),
            Command::SendMessage { group_id, content } => {
                self.send_message(&group_id, content).await
            },
            Command::ProcessMessage { event } => self.process_message(&event),
            Command::ExportSecret { group_id, label, context, length } => {
                self.export_secret(&group_id, &label, &context, length)
            },
        }
    }

    fn relay_urls(&self) -> Vec<String> {
        self.pool
            .as_ref()
            .map(|pool| pool.urls().into_iter().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Publish if relays are configured. Returns the failure, if any.
    async fn publish(&mut self, events: &[Event]) -> Option<String> {
        let pool = self.pool.as_ref()?;
        let mut errors = Vec::new();
        for event in events {
            self.seen.insert(&event.id);
            if let Err(e) = pool.publish(event).await {
                tracing::warn!(event = %event.id, kind = event.kind, error = %e, "publish failed");
                errors.push(e.to_string());
            }
        }
        if errors.is_empty() { None } else { Some(errors.join("; ")) }
    }

    async fn keygen(
        &mut self,
        last_resort: bool,
        suite: CipherSuite,
    ) -> Result<Response, BridgeError> {
        let generated = key_package::generate(&self.env, &self.identity, suite, last_resort)?;
        let id = hex::encode(&generated.hash_ref);
        let created_at = self.env.wall_clock_secs();
        let event = key_package_event(
            &self.identity,
            &generated.serialized,
            suite,
            &self.relay_urls(),
            created_at,
        );

        self.store.save_key_package(&StoredKeyPackage {
            id: id.clone(),
            ciphersuite: suite,
            last_resort,
            event: event.clone(),
            pending: hex::encode(generated.pending.serialize()?),
            created_at,
        })?;
        self.pending_joins.insert(id.clone(), generated.pending);

        let publish_error = self.publish(std::slice::from_ref(&event)).await;
        tracing::info!(key_package = %id, %suite, last_resort, "generated key package");
        Ok(Response::KeyPackage {
            key_package_id: id,
            ciphersuite: suite,
            last_resort,
            event,
            publish_error,
        })
    }

    fn create_group(&mut self, config: GroupConfig) -> Result<Response, BridgeError> {
        let (group, _) = Group::create(&self.env, &self.identity, config)?;
        let group_id = group.wire_group_id_hex();

        persist(&self.store, &group, self.env.wall_clock_secs())?;
        self.access.add_group(&group_id)?;

        let metadata = hex::encode(group.metadata().encode()?);
        let created = summary(&group);
        self.groups.insert(group_id, group);
        self.resubscribe = true;

        Ok(Response::GroupCreated { group: created, metadata })
    }

    async fn add_members(
        &mut self,
        group_id: &str,
        announcements: &[Event],
    ) -> Result<Response, BridgeError> {
        if announcements.is_empty() {
            return Err(BridgeError::InvalidInput("no key packages to add".to_string()));
        }

        let mut key_packages = Vec::with_capacity(announcements.len());
        let mut sources = HashMap::new();
        for event in announcements {
            let bytes = open_key_package(event)?;
            let owner = key_package_identity(&bytes)?;
            if owner != event.pubkey {
                return Err(BridgeError::KeyPackageOwner {
                    event_id: event.id.clone(),
                    author: event.pubkey,
                });
            }
            // Invitations to this identity must be deliverable
            x25519_public(&owner).map_err(|e| EnvelopeError::InvalidKey(e.to_string()))?;

            sources.insert(owner, event.id.clone());
            key_packages.push(bytes);
        }

        self.commit(group_id, Proposal::Add(key_packages), &sources).await
    }

    /// Create a commit, envelope it with the current epoch's key, persist,
    /// and publish it. Invitations are held until the merge. A commit that
    /// no relay accepts is discarded again.
    async fn commit(
        &mut self,
        group_id: &str,
        proposal: Proposal,
        sources: &HashMap<PublicKey, String>,
    ) -> Result<Response, BridgeError> {
        let group_id = group_id.to_ascii_lowercase();
        let now = self.env.wall_clock_secs();
        let group = self.groups.get_mut(&group_id).ok_or_else(|| not_found(&group_id))?;

        let key = group.exporter_key()?;
        let result = group.commit(proposal)?;
        persist(&self.store, group, now)?;

        let commit = group_message_event(&self.env, &group_id, &key, &result.commit);
        let mut welcomes = Vec::new();
        if let Some(welcome) = &result.welcome {
            for recipient in &result.recipients {
                let source = sources.get(recipient).map(String::as_str).unwrap_or_default();
                let rumor = welcome_rumor(
                    self.identity.public_key(),
                    welcome,
                    source,
                    &group.metadata().relays,
                    now,
                );
                welcomes.push(gift_wrap(&self.env, &self.identity, recipient, &rumor)?);
            }
        }

        tracing::info!(
            group = %group_id,
            target_epoch = result.target_epoch,
            invitations = welcomes.len(),
            "created commit"
        );

        if let Some(pool) = &self.pool {
            self.seen.insert(&commit.id);
            if let Err(e) = pool.publish(&commit).await {
                tracing::warn!(group = %group_id, error = %e, "no relay took the commit, discarding");
                group.discard_pending_commit()?;
                persist(&self.store, group, now)?;
                return Err(e.into());
            }
        }
        if !welcomes.is_empty() {
            self.held_welcomes.insert(group_id.clone(), welcomes.clone());
        }

        Ok(Response::CommitCreated { group_id, epoch: result.target_epoch, commit, welcomes })
    }

    async fn merge_pending_commit(&mut self, group_id: &str) -> Result<Response, BridgeError> {
        let group_id = group_id.to_ascii_lowercase();
        let now = self.env.wall_clock_secs();
        let group = self.groups.get_mut(&group_id).ok_or_else(|| not_found(&group_id))?;

        let epoch = group.merge_pending_commit()?;
        persist(&self.store, group, now)?;
        let member_count = group.member_count();

        if let Some(welcomes) = self.held_welcomes.remove(&group_id) {
            // Failures were already logged; the controller holds the invitations
            let _ = self.publish(&welcomes).await;
        }

        Ok(Response::CommitMerged { group_id, epoch, member_count })
    }

    fn list_groups(&self) -> Response {
        let mut groups: Vec<GroupSummary> = self.groups.values().map(summary).collect();
        groups.sort_by(|a, b| a.group_id.cmp(&b.group_id));
        Response::Groups { groups }
    }

    fn process_welcome(&mut self, event: Event) -> Result<Response, BridgeError> {
        // A bare rumor is unsigned; only the seal authenticates the inviter
        if event.kind != kinds::GIFT_WRAP {
            return Err(
                EnvelopeError::WrongKind { expected: kinds::GIFT_WRAP, actual: event.kind }.into()
            );
        }
        let (inviter, rumor) = unwrap_gift(&self.identity, &event)?;
        self.access.check_contact(&inviter)?;

        let welcome = open_welcome_rumor(&rumor)?;
        let (key_package_id, pending) = welcome_key_package_refs(&welcome)?
            .iter()
            .find_map(|r| {
                let id = hex::encode(r);
                self.pending_joins.get(&id).map(|pending| (id, pending))
            })
            .ok_or(BridgeError::NoMatchingKeyPackage)?;

        let join = StagedJoin::stage(pending, &welcome)?;
        let metadata = join.metadata().clone();
        let group_id = metadata.group_id_hex();
        if self.groups.contains_key(&group_id) {
            return Err(BridgeError::InvalidInput(format!("already a member of {group_id}")));
        }

        let response = Response::WelcomePending {
            welcome_id: rumor.id.clone(),
            group_id,
            name: metadata.name,
            description: metadata.description,
            admins: metadata.admins,
            relays: metadata.relays,
            member_count: join.member_count(),
            inviter,
        };

        let last_resort = pending.is_last_resort();
        self.staged
            .insert(rumor.id, StagedInvite { join, key_package_id, last_resort, inviter });
        Ok(response)
    }

    fn accept_welcome(&mut self, welcome_id: &str) -> Result<Response, BridgeError> {
        let invite = self
            .staged
            .remove(welcome_id)
            .ok_or_else(|| BridgeError::UnknownWelcome(welcome_id.to_string()))?;

        let group = invite.join.into_group()?;
        let group_id = group.wire_group_id_hex();
        persist(&self.store, &group, self.env.wall_clock_secs())?;
        self.access.add_group(&group_id)?;

        if !invite.last_resort {
            let consumed = invite.key_package_id;
            self.pending_joins.remove(&consumed);
            self.store.delete_key_package(&consumed)?;
            self.staged.retain(|_, other| other.key_package_id != consumed);
            tracing::debug!(key_package = %consumed, "consumed key package");
        }

        tracing::info!(group = %group_id, inviter = %invite.inviter, "accepted invitation");
        let joined = summary(&group);
        self.groups.insert(group_id, group);
        self.resubscribe = true;
        Ok(Response::GroupJoined { group: joined })
    }

    async fn send_message(
        &mut self,
        group_id: &str,
        content: String,
    ) -> Result<Response, BridgeError> {
        let group_id = group_id.to_ascii_lowercase();
        let now = self.env.wall_clock_secs();
        let group = self.groups.get_mut(&group_id).ok_or_else(|| not_found(&group_id))?;

        let rumor = chat_rumor(self.identity.public_key(), &group_id, &content, now);
        let json = rumor.to_json().map_err(EnvelopeError::from)?;
        let ciphertext = group.create_application_message(json.as_bytes())?;
        let event = group_message_event(&self.env, &group_id, &group.exporter_key()?, &ciphertext);

        persist(&self.store, group, now)?;
        self.store.save_message(&StoredMessage {
            id: rumor.id,
            group_id: group_id.clone(),
            sender: rumor.pubkey,
            content,
            created_at: now,
            epoch: group.epoch(),
            received_at: self.env.wall_clock_millis(),
        })?;

        let publish_error = self.publish(std::slice::from_ref(&event)).await;
        Ok(Response::MessageSent { group_id, event, publish_error })
    }

    fn process_message(&mut self, event: &Event) -> Result<Response, BridgeError> {
        if event.kind != kinds::GROUP_MESSAGE {
            return Err(EnvelopeError::WrongKind {
                expected: kinds::GROUP_MESSAGE,
                actual: event.kind,
            }
            .into());
        }
        let group_id = group_id_of(event)?.to_ascii_lowercase();
        self.access.check_group(&group_id)?;

        let now = self.env.wall_clock_secs();
        let group = self.groups.get_mut(&group_id).ok_or_else(|| not_found(&group_id))?;

        let key = group.exporter_key()?;
        let message = open_group_message(event, &key)?;
        let result = group.process_message(&message)?;
        persist(&self.store, group, now)?;

        match result {
            ProcessResult::Application { sender, plaintext } => {
                let json = String::from_utf8(plaintext)
                    .map_err(|e| EnvelopeError::Content(e.to_string()))?;
                let rumor = Event::from_json(&json).map_err(EnvelopeError::from)?;
                rumor.verify_id().map_err(EnvelopeError::from)?;
                if rumor.pubkey != sender {
                    return Err(EnvelopeError::AuthorMismatch.into());
                }
                if rumor.kind != kinds::CHAT_MESSAGE {
                    return Err(EnvelopeError::WrongKind {
                        expected: kinds::CHAT_MESSAGE,
                        actual: rumor.kind,
                    }
                    .into());
                }

                let epoch = group.epoch();
                self.store.save_message(&StoredMessage {
                    id: rumor.id,
                    group_id: group_id.clone(),
                    sender,
                    content: rumor.content.clone(),
                    created_at: rumor.created_at,
                    epoch,
                    received_at: self.env.wall_clock_millis(),
                })?;

                Ok(Response::Message {
                    group_id,
                    sender,
                    content: rumor.content,
                    created_at: rumor.created_at,
                    epoch,
                })
            },
            ProcessResult::Proposal { sender } => {
                Ok(Response::ProposalReceived { group_id, sender })
            },
            ProcessResult::Commit { sender, epoch, active } => {
                let member_count = group.member_count();
                // Our own pending commit lost the race
                self.held_welcomes.remove(&group_id);
                if !active {
                    tracing::info!(group = %group_id, %sender, "removed from group");
                }
                Ok(Response::CommitProcessed { group_id, sender, epoch, member_count, active })
            },
        }
    }

    fn export_secret(
        &self,
        group_id: &str,
        label: &str,
        context: &str,
        length: usize,
    ) -> Result<Response, BridgeError> {
        let group_id = group_id.to_ascii_lowercase();
        let group = self.groups.get(&group_id).ok_or_else(|| not_found(&group_id))?;
        let secret = group.export_secret(label, context.as_bytes(), length)?;
        Ok(Response::Secret { group_id, epoch: group.epoch(), secret: hex::encode(secret) })
    }
}
