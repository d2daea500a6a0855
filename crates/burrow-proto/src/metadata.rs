//! Group-metadata MLS extension.
//!
//! The metadata travels inside the MLS group context as an unknown extension
//! of type [`GROUP_METADATA_EXTENSION_TYPE`]. Every member decodes it from the
//! group state, so the encoding must round-trip byte for byte.
//!
//! # Layout
//!
//! All integers are big-endian. Variable fields carry a `u16` length prefix.
//!
//! ```text
//! version       u16
//! group_id      [u8; 32]
//! name          u16 len || utf-8
//! description   u16 len || utf-8
//! admins        u16 len || 64-hex identity || 64-hex identity || ...
//! relays        u16 len || url "\n" url "\n" ...
//! image_hash    [u8; 32]
//! image_key     [u8; 32]
//! image_nonce   [u8; 12]
//! ```
//!
//! The admin blob has no delimiter. Decoding splits it on the fixed 64-char
//! width and rejects any blob that is not a whole number of valid hex
//! identities, so a malformed entry can never shift its neighbours.

use bytes::{Buf, BufMut};

use crate::{
    error::{DecodeError, EncodeError},
    key::PublicKey,
};

/// Extension type carrying [`GroupMetadata`].
pub const GROUP_METADATA_EXTENSION_TYPE: u16 = 0xF2EE;

/// Extension type of the empty last-resort key package marker.
pub const LAST_RESORT_EXTENSION_TYPE: u16 = 0x000A;

/// Current metadata layout version.
pub const METADATA_VERSION: u16 = 1;

const ADMIN_HEX_LEN: usize = 64;
const RELAY_SEPARATOR: char = '\n';

/// Group metadata embedded in the MLS group context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMetadata {
    /// Layout version
    pub version: u16,
    /// Wire group id (the `h` tag), distinct from the MLS group id
    pub group_id: [u8; 32],
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Identities allowed to change membership
    pub admins: Vec<PublicKey>,
    /// Relays the group publishes to
    pub relays: Vec<String>,
    /// Hash of the encrypted group image
    pub image_hash: [u8; 32],
    /// Key of the encrypted group image
    pub image_key: [u8; 32],
    /// Nonce of the encrypted group image
    pub image_nonce: [u8; 12],
}

impl GroupMetadata {
    /// Metadata with no image and the current layout version.
    pub fn new(
        group_id: [u8; 32],
        name: impl Into<String>,
        description: impl Into<String>,
        admins: Vec<PublicKey>,
        relays: Vec<String>,
    ) -> Self {
        Self {
            version: METADATA_VERSION,
            group_id,
            name: name.into(),
            description: description.into(),
            admins,
            relays,
            image_hash: [0; 32],
            image_key: [0; 32],
            image_nonce: [0; 12],
        }
    }

    /// Hex of the wire group id.
    pub fn group_id_hex(&self) -> String {
        hex::encode(self.group_id)
    }

    /// Whether `identity` is listed as an admin.
    pub fn is_admin(&self, identity: &PublicKey) -> bool {
        self.admins.contains(identity)
    }

    /// Encode to the extension payload.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let admins: String = self.admins.iter().map(PublicKey::to_hex).collect();

        for relay in &self.relays {
            if relay.is_empty() || relay.contains(RELAY_SEPARATOR) {
                return Err(EncodeError::InvalidRelay(relay.clone()));
            }
        }
        let relays = self.relays.join("\n");

        let mut buf = Vec::with_capacity(
            2 + 32
                + 8
                + self.name.len()
                + self.description.len()
                + admins.len()
                + relays.len()
                + 76,
        );
        buf.put_u16(self.version);
        buf.put_slice(&self.group_id);
        put_prefixed(&mut buf, "name", self.name.as_bytes())?;
        put_prefixed(&mut buf, "description", self.description.as_bytes())?;
        put_prefixed(&mut buf, "admins", admins.as_bytes())?;
        put_prefixed(&mut buf, "relays", relays.as_bytes())?;
        buf.put_slice(&self.image_hash);
        buf.put_slice(&self.image_key);
        buf.put_slice(&self.image_nonce);
        Ok(buf)
    }

    /// Decode an extension payload.
    pub fn decode(mut bytes: &[u8]) -> Result<Self, DecodeError> {
        let buf = &mut bytes;

        ensure(buf, "version", 2)?;
        let version = buf.get_u16();
        let group_id = take_array::<32>(buf, "group_id")?;
        let name = take_string(buf, "name")?;
        let description = take_string(buf, "description")?;
        let admins = split_admins(&take_string(buf, "admins")?)?;
        let relays = split_relays(&take_string(buf, "relays")?)?;
        let image_hash = take_array::<32>(buf, "image_hash")?;
        let image_key = take_array::<32>(buf, "image_key")?;
        let image_nonce = take_array::<12>(buf, "image_nonce")?;

        if buf.has_remaining() {
            return Err(DecodeError::TrailingBytes(buf.remaining()));
        }

        Ok(Self {
            version,
            group_id,
            name,
            description,
            admins,
            relays,
            image_hash,
            image_key,
            image_nonce,
        })
    }
}

fn put_prefixed(buf: &mut Vec<u8>, field: &'static str, data: &[u8]) -> Result<(), EncodeError> {
    let len = u16::try_from(data.len())
        .map_err(|_| EncodeError::FieldTooLong { field, len: data.len() })?;
    buf.put_u16(len);
    buf.put_slice(data);
    Ok(())
}

fn ensure(buf: &&[u8], field: &'static str, needed: usize) -> Result<(), DecodeError> {
    if buf.remaining() < needed {
        return Err(DecodeError::Truncated { field, needed, remaining: buf.remaining() });
    }
    Ok(())
}

fn take_array<const N: usize>(
    buf: &mut &[u8],
    field: &'static str,
) -> Result<[u8; N], DecodeError> {
    ensure(buf, field, N)?;
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

fn take_string(buf: &mut &[u8], field: &'static str) -> Result<String, DecodeError> {
    ensure(buf, field, 2)?;
    let len = usize::from(buf.get_u16());
    ensure(buf, field, len)?;
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8(field))
}

fn split_admins(blob: &str) -> Result<Vec<PublicKey>, DecodeError> {
    if blob.len() % ADMIN_HEX_LEN != 0 {
        return Err(DecodeError::MalformedAdmins(format!(
            "blob length {} is not a multiple of {ADMIN_HEX_LEN}",
            blob.len()
        )));
    }
    // Blob is validated UTF-8; non-ASCII would make byte chunks split chars.
    if !blob.is_ascii() {
        return Err(DecodeError::MalformedAdmins("non-ascii admin blob".to_string()));
    }

    // Encoding only ever emits lowercase
    if blob.bytes().any(|b| b.is_ascii_uppercase()) {
        return Err(DecodeError::MalformedAdmins("admin hex must be lowercase".to_string()));
    }

    blob.as_bytes()
        .chunks(ADMIN_HEX_LEN)
        .map(|chunk| {
            let s = std::str::from_utf8(chunk)
                .map_err(|_| DecodeError::MalformedAdmins("non-ascii admin blob".to_string()))?;
            PublicKey::from_hex(s).map_err(|e| DecodeError::MalformedAdmins(e.to_string()))
        })
        .collect()
}

fn split_relays(blob: &str) -> Result<Vec<String>, DecodeError> {
    if blob.is_empty() {
        return Ok(Vec::new());
    }
    blob.split(RELAY_SEPARATOR)
        .enumerate()
        .map(|(i, relay)| {
            if relay.is_empty() {
                Err(DecodeError::MalformedRelays(format!("relay {i} is empty")))
            } else {
                Ok(relay.to_owned())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GroupMetadata {
        let mut m = GroupMetadata::new(
            [7; 32],
            "Test",
            "a group",
            vec![PublicKey::from_bytes([1; 32]), PublicKey::from_bytes([2; 32])],
            vec!["wss://r1".to_string(), "wss://r2".to_string()],
        );
        m.image_nonce = [9; 12];
        m
    }

    #[test]
    fn roundtrip() {
        let m = sample();
        let bytes = m.encode().unwrap();
        assert_eq!(GroupMetadata::decode(&bytes).unwrap(), m);
    }

    #[test]
    fn layout_starts_with_version_and_group_id() {
        let bytes = sample().encode().unwrap();
        assert_eq!(&bytes[..2], &METADATA_VERSION.to_be_bytes());
        assert_eq!(&bytes[2..34], &[7; 32]);
        assert_eq!(&bytes[34..36], &4u16.to_be_bytes());
        assert_eq!(&bytes[36..40], b"Test");
    }

    #[test]
    fn empty_lists_roundtrip() {
        let m = GroupMetadata::new([0; 32], "", "", vec![], vec![]);
        let bytes = m.encode().unwrap();
        // version + id + four empty prefixes + image blocks
        assert_eq!(bytes.len(), 2 + 32 + 8 + 76);
        assert_eq!(GroupMetadata::decode(&bytes).unwrap(), m);
    }

    #[test]
    fn every_truncation_is_rejected() {
        let bytes = sample().encode().unwrap();
        for cut in 0..bytes.len() {
            let err = GroupMetadata::decode(&bytes[..cut]).unwrap_err();
            assert!(matches!(err, DecodeError::Truncated { .. }), "cut at {cut}: {err:?}");
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = sample().encode().unwrap();
        bytes.push(0);
        assert_eq!(GroupMetadata::decode(&bytes), Err(DecodeError::TrailingBytes(1)));
    }

    #[test]
    fn misaligned_admin_blob_is_rejected() {
        let mut m = GroupMetadata::new([0; 32], "n", "d", vec![], vec![]);
        m.admins.clear();
        let mut bytes = m.encode().unwrap();
        // Rewrite the (empty) admin field with 63 hex chars.
        let admin_at = 2 + 32 + 3 + 3;
        let bad = "a".repeat(63);
        let mut patched = bytes[..admin_at].to_vec();
        patched.extend_from_slice(&63u16.to_be_bytes());
        patched.extend_from_slice(bad.as_bytes());
        patched.extend_from_slice(&bytes.split_off(admin_at + 2));

        assert!(matches!(GroupMetadata::decode(&patched), Err(DecodeError::MalformedAdmins(_))));
    }

    /// Hand-built payload with raw admin and relay blobs.
    fn raw(admins: &str, relays: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u16(METADATA_VERSION);
        buf.put_slice(&[0; 32]);
        put_prefixed(&mut buf, "name", b"n").unwrap();
        put_prefixed(&mut buf, "description", b"d").unwrap();
        put_prefixed(&mut buf, "admins", admins.as_bytes()).unwrap();
        put_prefixed(&mut buf, "relays", relays.as_bytes()).unwrap();
        buf.put_slice(&[0; 76]);
        buf
    }

    #[test]
    fn uppercase_admin_hex_is_rejected() {
        let lower = "ab".repeat(32);
        assert!(GroupMetadata::decode(&raw(&lower, "")).is_ok());

        let upper = lower.to_ascii_uppercase();
        assert!(matches!(
            GroupMetadata::decode(&raw(&upper, "")),
            Err(DecodeError::MalformedAdmins(_))
        ));
    }

    #[test]
    fn empty_relay_entries_are_rejected() {
        let ok = GroupMetadata::decode(&raw("", "wss://a\nwss://b")).unwrap();
        assert_eq!(ok.relays, vec!["wss://a", "wss://b"]);

        for blob in ["wss://a\n\nwss://b", "wss://a\n", "\nwss://b", "\n"] {
            assert!(
                matches!(GroupMetadata::decode(&raw("", blob)), Err(DecodeError::MalformedRelays(_))),
                "{blob:?} accepted"
            );
        }
    }

    #[test]
    fn decoded_payloads_reencode_identically() {
        let bytes = raw(&"0f".repeat(64), "wss://a\nwss://b");
        let m = GroupMetadata::decode(&bytes).unwrap();
        assert_eq!(m.encode().unwrap(), bytes);
    }

    #[test]
    fn relay_with_newline_cannot_be_encoded() {
        let m = GroupMetadata::new([0; 32], "n", "d", vec![], vec!["wss://a\nwss://b".into()]);
        assert!(matches!(m.encode(), Err(EncodeError::InvalidRelay(_))));
    }

    #[test]
    fn oversized_name_cannot_be_encoded() {
        let m = GroupMetadata::new([0; 32], "x".repeat(70_000), "", vec![], vec![]);
        assert_eq!(m.encode(), Err(EncodeError::FieldTooLong { field: "name", len: 70_000 }));
    }
}
