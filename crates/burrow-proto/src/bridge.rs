//! Daemon IPC messages.
//!
//! The daemon speaks newline-delimited JSON. Each input line is one
//! [`Command`], discriminated by its `command` field. Each output line is
//! exactly one [`Response`], discriminated by its `type` field, written in
//! the order the commands arrived. There are no request ids: position is the
//! only correlation, so a controller keeps at most one command in flight.
//!
//! The first output line of a worker is always [`Response::Ready`].

use serde::{Deserialize, Serialize};

use crate::{event::Event, key::PublicKey, suite::CipherSuite};

/// Default exporter label for [`Command::ExportSecret`].
pub const DEFAULT_EXPORT_LABEL: &str = "marmot";

/// Default exporter context for [`Command::ExportSecret`].
pub const DEFAULT_EXPORT_CONTEXT: &str = "group-event";

/// Default exporter length for [`Command::ExportSecret`].
pub const DEFAULT_EXPORT_LENGTH: usize = 32;

fn default_export_label() -> String {
    DEFAULT_EXPORT_LABEL.to_string()
}

fn default_export_context() -> String {
    DEFAULT_EXPORT_CONTEXT.to_string()
}

fn default_export_length() -> usize {
    DEFAULT_EXPORT_LENGTH
}

/// A request line from the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Generate a key package and its signed announcement.
    Keygen {
        /// Reusable fallback package
        #[serde(default)]
        last_resort: bool,
        /// Ciphersuite to generate for
        #[serde(default)]
        ciphersuite: CipherSuite,
    },

    /// Create a group with this identity as sole member.
    CreateGroup {
        /// Display name
        name: String,
        /// Description
        #[serde(default)]
        description: String,
        /// Relays the group publishes to
        #[serde(default)]
        relays: Vec<String>,
        /// Additional admins; the creator is always an admin
        #[serde(default)]
        admins: Vec<PublicKey>,
        /// Ciphersuite for the group
        #[serde(default)]
        ciphersuite: CipherSuite,
    },

    /// Confirm the pending commit of a group.
    MergePendingCommit {
        /// Wire group id (hex)
        group_id: String,
    },

    /// Commit adding members from their key package announcements.
    AddMembers {
        /// Wire group id (hex)
        group_id: String,
        /// Signed key package announcements
        key_packages: Vec<Event>,
    },

    /// Commit removing members by identity.
    RemoveMembers {
        /// Wire group id (hex)
        group_id: String,
        /// Identities to remove
        members: Vec<PublicKey>,
    },

    /// Commit rotating this member's leaf key.
    SelfUpdate {
        /// Wire group id (hex)
        group_id: String,
    },

    /// Enumerate groups held in memory.
    ListGroups,

    /// Decode an invitation without joining.
    ProcessWelcome {
        /// Gift wrap addressed to us
        event: Event,
    },

    /// Join the group of a previously processed invitation.
    AcceptWelcome {
        /// Id of the welcome rumor
        welcome_id: String,
    },

    /// Encrypt and envelope a chat message.
    SendMessage {
        /// Wire group id (hex)
        group_id: String,
        /// Message text
        content: String,
    },

    /// Decrypt and apply a group ciphertext envelope.
    ProcessMessage {
        /// Group ciphertext envelope
        event: Event,
    },

    /// Derive a secret from the current epoch.
    ExportSecret {
        /// Wire group id (hex)
        group_id: String,
        /// Exporter label
        #[serde(default = "default_export_label")]
        label: String,
        /// Exporter context (UTF-8)
        #[serde(default = "default_export_context")]
        context: String,
        /// Output length in bytes
        #[serde(default = "default_export_length")]
        length: usize,
    },
}

impl Command {
    /// Wire name of the command, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Keygen { .. } => "keygen",
            Self::CreateGroup { .. } => "create_group",
            Self::MergePendingCommit { .. } => "merge_pending_commit",
            Self::AddMembers { .. } => "add_members",
            Self::RemoveMembers { .. } => "remove_members",
            Self::SelfUpdate { .. } => "self_update",
            Self::ListGroups => "list_groups",
            Self::ProcessWelcome { .. } => "process_welcome",
            Self::AcceptWelcome { .. } => "accept_welcome",
            Self::SendMessage { .. } => "send_message",
            Self::ProcessMessage { .. } => "process_message",
            Self::ExportSecret { .. } => "export_secret",
        }
    }
}

/// Public view of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
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
    /// Current epoch
    pub epoch: u64,
    /// Member identities in leaf order
    pub members: Vec<PublicKey>,
    /// Whether a local commit awaits merge
    pub pending_commit: bool,
}

/// A response line to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// First line of every worker.
    Ready {
        /// Identity public key
        pubkey: PublicKey,
    },

    /// Result of [`Command::Keygen`].
    KeyPackage {
        /// Key package hash reference (hex)
        key_package_id: String,
        /// Ciphersuite
        ciphersuite: CipherSuite,
        /// Reusable fallback package
        last_resort: bool,
        /// Signed announcement (kind 443)
        event: Event,
        /// Relay failure, if publishing was attempted and failed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        publish_error: Option<String>,
    },

    /// Result of [`Command::CreateGroup`].
    GroupCreated {
        /// The new group
        group: GroupSummary,
        /// Encoded metadata extension (hex)
        metadata: String,
    },

    /// Result of add, remove and update commits. The group is now pending.
    ///
    /// With relays configured, this is only returned once at least one relay
    /// stored the commit. If every relay refuses, the pending commit is
    /// discarded and an error is returned instead, so the controller never
    /// merges a commit the other members cannot see.
    CommitCreated {
        /// Wire group id (hex)
        group_id: String,
        /// Epoch the commit creates once merged
        epoch: u64,
        /// Group ciphertext envelope carrying the commit
        commit: Event,
        /// Gift-wrapped invitations, one per added member
        welcomes: Vec<Event>,
    },

    /// Result of [`Command::MergePendingCommit`].
    CommitMerged {
        /// Wire group id (hex)
        group_id: String,
        /// New epoch
        epoch: u64,
        /// Members after the merge
        member_count: usize,
    },

    /// Result of [`Command::ListGroups`].
    Groups {
        /// All groups held in memory
        groups: Vec<GroupSummary>,
    },

    /// Result of [`Command::ProcessWelcome`].
    WelcomePending {
        /// Id of the welcome rumor, used by [`Command::AcceptWelcome`]
        welcome_id: String,
        /// Wire group id (hex)
        group_id: String,
        /// Display name
        name: String,
        /// Description
        description: String,
        /// Admin identities
        admins: Vec<PublicKey>,
        /// Relays
        relays: Vec<String>,
        /// Members including us
        member_count: usize,
        /// Author of the invitation
        inviter: PublicKey,
    },

    /// Result of [`Command::AcceptWelcome`].
    GroupJoined {
        /// The joined group
        group: GroupSummary,
    },

    /// Result of [`Command::SendMessage`].
    MessageSent {
        /// Wire group id (hex)
        group_id: String,
        /// Group ciphertext envelope (kind 445)
        event: Event,
        /// Relay failure, if publishing was attempted and failed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        publish_error: Option<String>,
    },

    /// Application message decrypted by [`Command::ProcessMessage`].
    Message {
        /// Wire group id (hex)
        group_id: String,
        /// Author identity
        sender: PublicKey,
        /// Message text
        content: String,
        /// Author timestamp
        created_at: u64,
        /// Epoch the message was sent in
        epoch: u64,
    },

    /// Commit applied by [`Command::ProcessMessage`].
    CommitProcessed {
        /// Wire group id (hex)
        group_id: String,
        /// Committer identity
        sender: PublicKey,
        /// New epoch
        epoch: u64,
        /// Members after the commit
        member_count: usize,
        /// False when the commit removed us
        active: bool,
    },

    /// Proposal stored by [`Command::ProcessMessage`].
    ProposalReceived {
        /// Wire group id (hex)
        group_id: String,
        /// Proposer identity
        sender: PublicKey,
    },

    /// Result of [`Command::ExportSecret`].
    Secret {
        /// Wire group id (hex)
        group_id: String,
        /// Epoch the secret is bound to
        epoch: u64,
        /// Secret bytes (hex)
        secret: String,
    },

    /// Any failure. The worker stays up.
    Error {
        /// Human readable reason
        error: String,
    },
}

impl Response {
    /// Error response from any displayable error.
    pub fn error(err: impl std::fmt::Display) -> Self {
        Self::Error { error: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keygen_defaults() {
        let cmd: Command = serde_json::from_str(r#"{"command":"keygen"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Keygen { last_resort: false, ciphersuite: CipherSuite::default() }
        );
    }

    #[test]
    fn export_secret_defaults() {
        let cmd: Command =
            serde_json::from_str(r#"{"command":"export_secret","group_id":"ab"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::ExportSecret {
                group_id: "ab".into(),
                label: DEFAULT_EXPORT_LABEL.into(),
                context: DEFAULT_EXPORT_CONTEXT.into(),
                length: DEFAULT_EXPORT_LENGTH,
            }
        );
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(serde_json::from_str::<Command>(r#"{"command":"self_destruct"}"#).is_err());
    }

    #[test]
    fn error_response_shape() {
        let json = serde_json::to_string(&Response::error("unknown group: ab")).unwrap();
        assert_eq!(json, r#"{"type":"error","error":"unknown group: ab"}"#);
    }

    #[test]
    fn ready_response_shape() {
        let pubkey = PublicKey::from_bytes([0; 32]);
        let json = serde_json::to_string(&Response::Ready { pubkey }).unwrap();
        assert_eq!(json, format!(r#"{{"type":"ready","pubkey":"{}"}}"#, "00".repeat(32)));
    }
}
