//! Snapshot tests for extension wire format stability.
//!
//! The metadata extension is read by other implementations of the protocol.
//! If the layout changes, these tests fail before a release does.

use burrow_proto::{GroupMetadata, PublicKey};
use insta::assert_snapshot;

#[test]
fn snapshot_minimal_metadata() {
    let metadata = GroupMetadata::new([0x11; 32], "Test", "", vec![], vec!["wss://r1".into()]);
    let bytes = metadata.encode().expect("encode should succeed");

    assert_snapshot!(hex::encode(bytes));
}

#[test]
fn snapshot_full_metadata() {
    let mut group_id = [0u8; 32];
    for (i, byte) in group_id.iter_mut().enumerate() {
        *byte = i as u8;
    }
    let mut metadata = GroupMetadata::new(
        group_id,
        "Burrow",
        "weekly sync",
        vec![PublicKey::from_bytes([0xAA; 32])],
        vec!["wss://relay.one".into(), "wss://relay.two".into()],
    );
    metadata.image_hash = [1; 32];
    metadata.image_key = [2; 32];
    metadata.image_nonce = [3; 12];
    let bytes = metadata.encode().expect("encode should succeed");

    assert_snapshot!(hex::encode(bytes));
}
