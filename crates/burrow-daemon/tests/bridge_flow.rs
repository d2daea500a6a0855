//! End-to-end command flows between two workers.
//!
//! These tests verify:
//! - A key package generated by one worker can be added by another, and the
//!   invitation joins the same group at the same epoch
//! - Chat messages decrypt on the other side with author and content intact
//! - Non-last-resort key packages are consumed by the join
//! - Invitations from contacts outside the allow-list are refused
//! - Invitations only count when they arrive sealed by the inviter
//! - A commit no relay accepts is discarded and the group stays usable
//! - A restarted worker carries on from persisted state

use std::sync::Arc;

use burrow_core::{Environment, Identity, env::test_utils::MockEnv};
use burrow_daemon::{AccessControl, Bridge, MemoryStore, Store};
use burrow_proto::{CipherSuite, Command, Event, GroupSummary, PublicKey, Response};
use burrow_relay::{MemoryRelay, Relay, RelayPool};
use tempfile::TempDir;

struct Worker {
    bridge: Bridge<MockEnv, MemoryStore>,
    store: MemoryStore,
    identity: Identity,
    env: MockEnv,
    dir: TempDir,
}

fn access(dir: &TempDir, owner: PublicKey, contacts: &[PublicKey]) -> AccessControl {
    let mut access = AccessControl::open(dir.path().join("access.json"), Some(owner)).unwrap();
    for contact in contacts {
        access.add_contact(*contact).unwrap();
    }
    access
}

fn worker(seed: u64, contacts: &[PublicKey], pool: Option<RelayPool>) -> Worker {
    let env = MockEnv::with_seed(seed);
    let identity = Identity::generate(&env);
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let access = access(&dir, identity.public_key(), contacts);
    let bridge = Bridge::new(
        env.clone(),
        Identity::from_secret_hex(&identity.secret_key_hex()).unwrap(),
        store.clone(),
        access,
        pool,
    )
    .unwrap();
    Worker { bridge, store, identity, env, dir }
}

fn pubkey_of(seed: u64) -> PublicKey {
    Identity::generate(&MockEnv::with_seed(seed)).public_key()
}

async fn keygen(worker: &mut Worker, last_resort: bool) -> Event {
    match worker
        .bridge
        .handle(Command::Keygen { last_resort, ciphersuite: CipherSuite::default() })
        .await
    {
        Response::KeyPackage { event, last_resort: lr, publish_error, .. } => {
            assert_eq!(lr, last_resort);
            assert_eq!(publish_error, None);
            event
        },
        other => panic!("expected key_package, got {other:?}"),
    }
}

async fn create_group(worker: &mut Worker, name: &str) -> GroupSummary {
    let response = worker
        .bridge
        .handle(Command::CreateGroup {
            name: name.to_string(),
            description: "flow".to_string(),
            relays: vec!["wss://r1".to_string()],
            admins: vec![],
            ciphersuite: CipherSuite::default(),
        })
        .await;
    match response {
        Response::GroupCreated { group, .. } => group,
        other => panic!("expected group_created, got {other:?}"),
    }
}

/// Owner adds `invitee`'s key package, merges, and returns the gift wrap.
async fn invite(owner: &mut Worker, group_id: &str, key_package: Event) -> Event {
    let response = owner
        .bridge
        .handle(Command::AddMembers {
            group_id: group_id.to_string(),
            key_packages: vec![key_package],
        })
        .await;
    let Response::CommitCreated { epoch, mut welcomes, .. } = response else {
        panic!("expected commit_created, got {response:?}");
    };
    assert_eq!(welcomes.len(), 1);

    let merged =
        owner.bridge.handle(Command::MergePendingCommit { group_id: group_id.to_string() }).await;
    assert!(
        matches!(merged, Response::CommitMerged { epoch: e, .. } if e == epoch),
        "unexpected merge response {merged:?}"
    );
    welcomes.remove(0)
}

async fn join(invitee: &mut Worker, wrap: Event) -> GroupSummary {
    let pending = invitee.bridge.handle(Command::ProcessWelcome { event: wrap }).await;
    let Response::WelcomePending { welcome_id, .. } = pending else {
        panic!("expected welcome_pending, got {pending:?}");
    };
    match invitee.bridge.handle(Command::AcceptWelcome { welcome_id }).await {
        Response::GroupJoined { group } => group,
        other => panic!("expected group_joined, got {other:?}"),
    }
}

async fn send(worker: &mut Worker, group_id: &str, content: &str) -> Event {
    match worker
        .bridge
        .handle(Command::SendMessage { group_id: group_id.to_string(), content: content.into() })
        .await
    {
        Response::MessageSent { event, .. } => event,
        other => panic!("expected message_sent, got {other:?}"),
    }
}

#[tokio::test]
async fn invite_join_and_chat() {
    let mut alice = worker(1, &[], None);
    let mut bob = worker(2, &[pubkey_of(1)], None);

    let key_package = keygen(&mut bob, false).await;
    assert_eq!(bob.store.load_key_packages().unwrap().len(), 1);

    let group = create_group(&mut alice, "Test").await;
    assert_eq!(group.epoch, 0);
    assert_eq!(group.admins, vec![alice.identity.public_key()]);

    let wrap = invite(&mut alice, &group.group_id, key_package).await;
    assert_eq!(wrap.kind, 1059);

    // Preview before joining
    let pending = bob.bridge.handle(Command::ProcessWelcome { event: wrap.clone() }).await;
    match &pending {
        Response::WelcomePending { group_id, name, member_count, inviter, relays, .. } => {
            assert_eq!(group_id, &group.group_id);
            assert_eq!(name, "Test");
            assert_eq!(*member_count, 2);
            assert_eq!(*inviter, alice.identity.public_key());
            assert_eq!(relays, &vec!["wss://r1".to_string()]);
        },
        other => panic!("expected welcome_pending, got {other:?}"),
    }

    let joined = join(&mut bob, wrap).await;
    assert_eq!(joined.group_id, group.group_id);
    assert_eq!(joined.epoch, 1);
    assert_eq!(joined.members.len(), 2);
    assert!(bob.store.load_key_packages().unwrap().is_empty(), "key package not consumed");

    // Alice -> Bob
    let event = send(&mut alice, &group.group_id, "hello bob").await;
    match bob.bridge.handle(Command::ProcessMessage { event }).await {
        Response::Message { sender, content, epoch, .. } => {
            assert_eq!(sender, alice.identity.public_key());
            assert_eq!(content, "hello bob");
            assert_eq!(epoch, 1);
        },
        other => panic!("expected message, got {other:?}"),
    }

    // Bob -> Alice
    let event = send(&mut bob, &group.group_id, "hi alice").await;
    match alice.bridge.handle(Command::ProcessMessage { event }).await {
        Response::Message { sender, content, .. } => {
            assert_eq!(sender, bob.identity.public_key());
            assert_eq!(content, "hi alice");
        },
        other => panic!("expected message, got {other:?}"),
    }

    assert_eq!(alice.store.load_messages(&group.group_id).unwrap().len(), 2);
    assert_eq!(bob.store.load_messages(&group.group_id).unwrap().len(), 2);

    // Both sides derive the same secret
    let export = Command::ExportSecret {
        group_id: group.group_id.clone(),
        label: "marmot".into(),
        context: "group-event".into(),
        length: 32,
    };
    let a = alice.bridge.handle(export.clone()).await;
    let b = bob.bridge.handle(export).await;
    assert_eq!(a, b);
    assert!(matches!(a, Response::Secret { epoch: 1, .. }));
}

#[tokio::test]
async fn commit_from_member_advances_both_sides() {
    let mut alice = worker(3, &[], None);
    let mut bob = worker(4, &[pubkey_of(3)], None);

    let key_package = keygen(&mut bob, false).await;
    let group = create_group(&mut alice, "Rotate").await;
    let wrap = invite(&mut alice, &group.group_id, key_package).await;
    join(&mut bob, wrap).await;

    let response =
        bob.bridge.handle(Command::SelfUpdate { group_id: group.group_id.clone() }).await;
    let Response::CommitCreated { commit, epoch, welcomes, .. } = response else {
        panic!("expected commit_created, got {response:?}");
    };
    assert_eq!(epoch, 2);
    assert!(welcomes.is_empty());

    // Sending is blocked while the commit is pending
    let blocked = bob
        .bridge
        .handle(Command::SendMessage { group_id: group.group_id.clone(), content: "x".into() })
        .await;
    assert!(matches!(blocked, Response::Error { .. }));

    bob.bridge.handle(Command::MergePendingCommit { group_id: group.group_id.clone() }).await;

    match alice.bridge.handle(Command::ProcessMessage { event: commit }).await {
        Response::CommitProcessed { sender, epoch, member_count, active, .. } => {
            assert_eq!(sender, bob.identity.public_key());
            assert_eq!(epoch, 2);
            assert_eq!(member_count, 2);
            assert!(active);
        },
        other => panic!("expected commit_processed, got {other:?}"),
    }

    let event = send(&mut alice, &group.group_id, "after rotation").await;
    assert!(matches!(
        bob.bridge.handle(Command::ProcessMessage { event }).await,
        Response::Message { epoch: 2, .. }
    ));
}

#[tokio::test]
async fn removed_member_becomes_inactive() {
    let mut alice = worker(5, &[], None);
    let mut bob = worker(6, &[pubkey_of(5)], None);

    let key_package = keygen(&mut bob, false).await;
    let group = create_group(&mut alice, "Remove").await;
    let wrap = invite(&mut alice, &group.group_id, key_package).await;
    join(&mut bob, wrap).await;

    let response = alice
        .bridge
        .handle(Command::RemoveMembers {
            group_id: group.group_id.clone(),
            members: vec![bob.identity.public_key()],
        })
        .await;
    let Response::CommitCreated { commit, .. } = response else {
        panic!("expected commit_created, got {response:?}");
    };
    alice.bridge.handle(Command::MergePendingCommit { group_id: group.group_id.clone() }).await;

    match bob.bridge.handle(Command::ProcessMessage { event: commit }).await {
        Response::CommitProcessed { active, .. } => assert!(!active),
        other => panic!("expected commit_processed, got {other:?}"),
    }
}

#[tokio::test]
async fn invitation_from_stranger_is_refused() {
    let mut alice = worker(7, &[], None);
    let mut bob = worker(8, &[], None);

    let key_package = keygen(&mut bob, false).await;
    let group = create_group(&mut alice, "Stranger").await;
    let wrap = invite(&mut alice, &group.group_id, key_package).await;

    match bob.bridge.handle(Command::ProcessWelcome { event: wrap }).await {
        Response::Error { error } => assert!(error.contains("not allowed"), "{error}"),
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(bob.store.load_key_packages().unwrap().len(), 1);
}

#[tokio::test]
async fn bare_welcome_rumor_is_refused() {
    let mut alice = worker(19, &[], None);
    let mut bob = worker(20, &[], None);

    let key_package = keygen(&mut bob, false).await;
    let group = create_group(&mut alice, "Stranger").await;
    let wrap = invite(&mut alice, &group.group_id, key_package).await;

    // Unsigned rumors carry any author they like, including the owner
    let (_, rumor) = burrow_relay::envelope::unwrap_gift(&bob.identity, &wrap).unwrap();
    let welcome = burrow_relay::envelope::open_welcome_rumor(&rumor).unwrap();
    let claimed = burrow_relay::envelope::welcome_rumor(
        bob.identity.public_key(),
        &welcome,
        "",
        &[],
        1,
    );
    assert!(claimed.sig.is_none());

    for event in [rumor, claimed] {
        let response = bob.bridge.handle(Command::ProcessWelcome { event }).await;
        assert!(matches!(response, Response::Error { .. }), "{response:?}");
    }
    match bob.bridge.handle(Command::ListGroups).await {
        Response::Groups { groups } => assert!(groups.is_empty()),
        other => panic!("expected groups, got {other:?}"),
    }
}

#[tokio::test]
async fn forged_key_package_announcement_is_refused() {
    let mut alice = worker(9, &[], None);
    let mut bob = worker(10, &[], None);
    let mallory = Identity::generate(&MockEnv::with_seed(11));

    let genuine = keygen(&mut bob, false).await;
    // Mallory re-signs Bob's key package as her own announcement
    let forged = burrow_relay::envelope::key_package_event(
        &mallory,
        &hex::decode(&genuine.content).unwrap(),
        CipherSuite::default(),
        &[],
        genuine.created_at,
    );

    let group = create_group(&mut alice, "Forged").await;
    let response = alice
        .bridge
        .handle(Command::AddMembers { group_id: group.group_id.clone(), key_packages: vec![forged] })
        .await;
    match response {
        Response::Error { error } => assert!(error.contains("not owned"), "{error}"),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn last_resort_key_package_survives_join() {
    let mut alice = worker(12, &[], None);
    let mut bob = worker(13, &[pubkey_of(12)], None);

    let key_package = keygen(&mut bob, true).await;
    let group = create_group(&mut alice, "Fallback").await;
    let wrap = invite(&mut alice, &group.group_id, key_package.clone()).await;
    join(&mut bob, wrap).await;

    assert_eq!(bob.store.load_key_packages().unwrap().len(), 1);

    // Same package works for a second group
    let second = create_group(&mut alice, "Second").await;
    let wrap = invite(&mut alice, &second.group_id, key_package).await;
    let joined = join(&mut bob, wrap).await;
    assert_eq!(joined.group_id, second.group_id);
}

#[tokio::test]
async fn unknown_group_and_welcome_are_errors() {
    let mut alice = worker(14, &[], None);

    let response = alice
        .bridge
        .handle(Command::SendMessage { group_id: "ab".into(), content: "x".into() })
        .await;
    assert_eq!(response, Response::error("unknown group: ab"));

    let response = alice.bridge.handle(Command::AcceptWelcome { welcome_id: "cd".into() }).await;
    assert_eq!(response, Response::error("unknown welcome: cd"));

    let response =
        alice.bridge.handle(Command::MergePendingCommit { group_id: "ab".into() }).await;
    assert!(matches!(response, Response::Error { .. }));
}

#[tokio::test]
async fn restarted_worker_resumes() {
    let mut alice = worker(15, &[], None);
    let mut bob = worker(16, &[pubkey_of(15)], None);

    let key_package = keygen(&mut bob, false).await;
    let group = create_group(&mut alice, "Restart").await;
    let wrap = invite(&mut alice, &group.group_id, key_package).await;
    join(&mut bob, wrap).await;

    // Rebuild Bob from his store and access file alone
    let Worker { store, identity, env, dir, .. } = bob;
    let access =
        AccessControl::open(dir.path().join("access.json"), Some(identity.public_key())).unwrap();
    assert!(access.is_contact_allowed(&pubkey_of(15)));
    let restarted = Bridge::new(
        env.clone(),
        Identity::from_secret_hex(&identity.secret_key_hex()).unwrap(),
        store.clone(),
        access,
        None,
    )
    .unwrap();
    let mut bob = Worker { bridge: restarted, store, identity, env, dir };

    match bob.bridge.handle(Command::ListGroups).await {
        Response::Groups { groups } => {
            assert_eq!(groups.len(), 1);
            assert_eq!(groups[0].group_id, group.group_id);
            assert_eq!(groups[0].epoch, 1);
        },
        other => panic!("expected groups, got {other:?}"),
    }

    let event = send(&mut alice, &group.group_id, "still there?").await;
    assert!(matches!(
        bob.bridge.handle(Command::ProcessMessage { event }).await,
        Response::Message { .. }
    ));
}

#[tokio::test]
async fn relays_carry_commits_and_invitations() {
    let relay = MemoryRelay::new("mem://relay");
    let pool = || RelayPool::new(vec![Arc::new(relay.clone()) as Arc<dyn Relay>]);

    let mut alice = worker(17, &[], Some(pool()));
    let mut bob = worker(18, &[pubkey_of(17)], Some(pool()));

    let key_package = keygen(&mut bob, false).await;
    assert_eq!(key_package.tag_values("relays"), vec!["mem://relay"]);

    let group = create_group(&mut alice, "Relayed").await;
    let response = alice
        .bridge
        .handle(Command::AddMembers {
            group_id: group.group_id.clone(),
            key_packages: vec![key_package],
        })
        .await;
    assert!(matches!(response, Response::CommitCreated { .. }), "{response:?}");

    // The invitation is held back until the merge
    assert!(relay.events().iter().all(|e| e.kind != 1059));
    alice.bridge.handle(Command::MergePendingCommit { group_id: group.group_id.clone() }).await;
    let wrap = relay.events().into_iter().find(|e| e.kind == 1059).unwrap();

    // Bob picks the invitation up from the network and accepts it
    bob.bridge.ingest(wrap.clone()).await;
    let (_, rumor) = burrow_relay::envelope::unwrap_gift(&bob.identity, &wrap).unwrap();
    let welcome_id = rumor.id;
    let joined = bob.bridge.handle(Command::AcceptWelcome { welcome_id }).await;
    assert!(matches!(joined, Response::GroupJoined { .. }), "{joined:?}");
    assert_eq!(bob.bridge.subscription_filters().len(), 2);

    let sent = send(&mut alice, &group.group_id, "over the wire").await;
    assert!(relay.events().iter().any(|e| e.id == sent.id));
    bob.bridge.ingest(sent).await;
    let stored = bob.store.load_messages(&group.group_id).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content, "over the wire");
    assert_eq!(stored[0].received_at, bob.env.wall_clock_millis());
}

#[tokio::test]
async fn unpublished_commit_is_discarded() {
    let relay = MemoryRelay::new("mem://down");
    relay.set_online(false);
    let pool = RelayPool::new(vec![Arc::new(relay.clone()) as Arc<dyn Relay>]);

    let mut alice = worker(21, &[], Some(pool));
    let mut bob = worker(22, &[pubkey_of(21)], None);
    let key_package = keygen(&mut bob, false).await;
    let group = create_group(&mut alice, "Offline").await;

    let response = alice
        .bridge
        .handle(Command::AddMembers {
            group_id: group.group_id.clone(),
            key_packages: vec![key_package.clone()],
        })
        .await;
    assert!(matches!(response, Response::Error { .. }), "{response:?}");

    let groups = match alice.bridge.handle(Command::ListGroups).await {
        Response::Groups { groups } => groups,
        other => panic!("expected groups, got {other:?}"),
    };
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].epoch, 0);
    assert!(!groups[0].pending_commit);
    assert_eq!(groups[0].members, vec![alice.identity.public_key()]);

    // Nothing is left to merge, and the group still sends
    let merged =
        alice.bridge.handle(Command::MergePendingCommit { group_id: group.group_id.clone() }).await;
    assert!(matches!(merged, Response::Error { .. }), "{merged:?}");
    send(&mut alice, &group.group_id, "anyone?").await;
    assert!(relay.events().is_empty());

    // Once the relay is back the same key package goes through
    relay.set_online(true);
    let wrap = invite(&mut alice, &group.group_id, key_package).await;
    assert!(relay.events().iter().any(|e| e.kind == 445));
    let joined = join(&mut bob, wrap).await;
    assert_eq!(joined.epoch, 1);
    assert_eq!(joined.group_id, group.group_id);
}
