//! Relay envelopes.
//!
//! An [`Event`] is the unit relays store and forward. Its id is the SHA-256 of
//! the canonical JSON array `[0, pubkey, created_at, kind, tags, content]`,
//! and the signature is an Ed25519 signature over the 32 id bytes. Rumors are
//! events with a valid id and no signature; they are only ever transmitted
//! inside an encrypted container.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{error::EventError, key::PublicKey, kinds::tag};

/// Relay envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Hex SHA-256 of the canonical serialization
    pub id: String,
    /// Author key
    pub pubkey: PublicKey,
    /// Unix seconds
    pub created_at: u64,
    /// Envelope kind (see [`crate::kinds`])
    pub kind: u16,
    /// Tag arrays; first element is the tag name
    pub tags: Vec<Vec<String>>,
    /// Kind-specific content
    pub content: String,
    /// Hex Ed25519 signature over the id, absent on rumors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

impl Event {
    /// Canonical id over the signed fields.
    pub fn compute_id(
        pubkey: &PublicKey,
        created_at: u64,
        kind: u16,
        tags: &[Vec<String>],
        content: &str,
    ) -> [u8; 32] {
        let canonical =
            serde_json::json!([0, pubkey.to_hex(), created_at, kind, tags, content]).to_string();
        Sha256::digest(canonical.as_bytes()).into()
    }

    /// Check that `id` matches the content.
    pub fn verify_id(&self) -> Result<[u8; 32], EventError> {
        let expected =
            Self::compute_id(&self.pubkey, self.created_at, self.kind, &self.tags, &self.content);
        if hex::encode(expected) != self.id {
            return Err(EventError::IdMismatch);
        }
        Ok(expected)
    }

    /// Check id and signature.
    pub fn verify(&self) -> Result<(), EventError> {
        let id = self.verify_id()?;
        let sig_hex = self.sig.as_deref().ok_or_else(|| EventError::MissingSignature(self.id.clone()))?;

        let bad = || EventError::BadSignature(self.id.clone());
        let sig_bytes = hex::decode(sig_hex).map_err(|_| bad())?;
        let signature = Signature::from_slice(&sig_bytes).map_err(|_| bad())?;
        let key = VerifyingKey::from_bytes(self.pubkey.as_bytes()).map_err(|_| bad())?;
        key.verify(&id, &signature).map_err(|_| bad())
    }

    /// Whether the event carries a signature.
    pub fn is_signed(&self) -> bool {
        self.sig.is_some()
    }

    /// First value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().is_some_and(|n| n == name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }

    /// All values (everything after the name) of the first tag named `name`.
    pub fn tag_values(&self, name: &str) -> Vec<&str> {
        self.tags
            .iter()
            .find(|t| t.first().is_some_and(|n| n == name))
            .map(|t| t.iter().skip(1).map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Wire group id from the `h` tag.
    pub fn group_tag(&self) -> Option<&str> {
        self.tag_value(tag::GROUP)
    }

    /// Compact JSON serialization.
    pub fn to_json(&self) -> Result<String, EventError> {
        serde_json::to_string(self).map_err(|e| EventError::Malformed(e.to_string()))
    }

    /// Parse compact JSON.
    pub fn from_json(s: &str) -> Result<Self, EventError> {
        serde_json::from_str(s).map_err(|e| EventError::Malformed(e.to_string()))
    }
}

/// Builder for signed events and rumors.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    kind: u16,
    content: String,
    tags: Vec<Vec<String>>,
    created_at: u64,
}

impl EventBuilder {
    /// Start an event of `kind` stamped at `created_at`.
    pub fn new(kind: u16, content: impl Into<String>, created_at: u64) -> Self {
        Self { kind, content: content.into(), tags: Vec::new(), created_at }
    }

    /// Append a tag.
    #[must_use]
    pub fn tag<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.push(values.into_iter().map(Into::into).collect());
        self
    }

    /// Finish as an unsigned rumor authored by `author`.
    pub fn rumor(self, author: PublicKey) -> Event {
        let id = Event::compute_id(&author, self.created_at, self.kind, &self.tags, &self.content);
        Event {
            id: hex::encode(id),
            pubkey: author,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig: None,
        }
    }

    /// Finish and sign with `key`.
    pub fn sign(self, key: &SigningKey) -> Event {
        let author = PublicKey::from_bytes(key.verifying_key().to_bytes());
        let id = Event::compute_id(&author, self.created_at, self.kind, &self.tags, &self.content);
        let sig = key.sign(&id);
        Event {
            id: hex::encode(id),
            pubkey: author,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig: Some(hex::encode(sig.to_bytes())),
        }
    }
}

/// Subscription/query filter.
///
/// Empty lists match everything; populated lists match if any entry matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Event ids
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
    /// Authors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<PublicKey>,
    /// Kinds
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<u16>,
    /// `h` tag values
    #[serde(rename = "#h", default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    /// `p` tag values
    #[serde(rename = "#p", default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<PublicKey>,
    /// `e` tag values
    #[serde(rename = "#e", default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,
    /// Lower `created_at` bound, inclusive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    /// Upper `created_at` bound, inclusive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    /// Maximum number of stored events to return
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    /// Empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to `kind`.
    #[must_use]
    pub fn kind(mut self, kind: u16) -> Self {
        self.kinds.push(kind);
        self
    }

    /// Restrict to `author`.
    #[must_use]
    pub fn author(mut self, author: PublicKey) -> Self {
        self.authors.push(author);
        self
    }

    /// Restrict to events tagged with wire group id `group`.
    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    /// Restrict to events addressed to `recipient`.
    #[must_use]
    pub fn recipient(mut self, recipient: PublicKey) -> Self {
        self.recipients.push(recipient);
        self
    }

    /// Restrict to events created at or after `since`.
    #[must_use]
    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    /// Cap the number of stored events.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `event` satisfies every populated field.
    pub fn matches(&self, event: &Event) -> bool {
        let tagged = |name: &str, wanted: &[String]| {
            wanted.is_empty()
                || event.tags.iter().any(|t| {
                    t.first().is_some_and(|n| n == name)
                        && t.get(1).is_some_and(|v| wanted.contains(v))
                })
        };
        let recipients: Vec<String> = self.recipients.iter().map(PublicKey::to_hex).collect();

        (self.ids.is_empty() || self.ids.contains(&event.id))
            && (self.authors.is_empty() || self.authors.contains(&event.pubkey))
            && (self.kinds.is_empty() || self.kinds.contains(&event.kind))
            && tagged(tag::GROUP, &self.groups)
            && tagged(tag::RECIPIENT, &recipients)
            && tagged(tag::EVENT, &self.events)
            && self.since.is_none_or(|s| event.created_at >= s)
            && self.until.is_none_or(|u| event.created_at <= u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    #[test]
    fn signed_event_verifies() {
        let event = EventBuilder::new(445, "hello", 1_700_000_000)
            .tag(["h", "abcd"])
            .sign(&key(1));
        assert!(event.is_signed());
        event.verify().unwrap();
        assert_eq!(event.group_tag(), Some("abcd"));
    }

    #[test]
    fn tampered_content_fails_id_check() {
        let mut event = EventBuilder::new(445, "hello", 1).sign(&key(1));
        event.content.push('!');
        assert_eq!(event.verify(), Err(EventError::IdMismatch));
    }

    #[test]
    fn forged_author_fails_signature_check() {
        let mut event = EventBuilder::new(9, "hi", 1).sign(&key(1));
        event.pubkey = PublicKey::from_bytes(key(2).verifying_key().to_bytes());
        event.id = hex::encode(Event::compute_id(
            &event.pubkey,
            event.created_at,
            event.kind,
            &event.tags,
            &event.content,
        ));
        assert!(matches!(event.verify(), Err(EventError::BadSignature(_))));
    }

    #[test]
    fn rumor_has_id_but_no_signature() {
        let author = PublicKey::from_bytes([3; 32]);
        let rumor = EventBuilder::new(444, "00", 5).rumor(author);
        assert!(!rumor.is_signed());
        rumor.verify_id().unwrap();
        assert!(matches!(rumor.verify(), Err(EventError::MissingSignature(_))));
        assert!(!rumor.to_json().unwrap().contains("\"sig\""));
    }

    #[test]
    fn filter_matches_on_tags_and_time() {
        let recipient = PublicKey::from_bytes([9; 32]);
        let event = EventBuilder::new(1059, "x", 100).tag(["p", &recipient.to_hex()]).sign(&key(4));

        assert!(Filter::new().kind(1059).recipient(recipient).matches(&event));
        assert!(!Filter::new().kind(445).matches(&event));
        assert!(!Filter::new().recipient(PublicKey::from_bytes([8; 32])).matches(&event));
        assert!(!Filter::new().since(101).matches(&event));
        assert!(Filter::new().since(100).matches(&event));
    }

    #[test]
    fn filter_serializes_tag_queries_with_hash_prefix() {
        let json = serde_json::to_string(&Filter::new().kind(445).group("ab")).unwrap();
        assert_eq!(json, r##"{"kinds":[445],"#h":["ab"]}"##);
    }
}
