//! Envelope builders.
//!
//! Every MLS artefact leaves the process wrapped in an [`Event`]:
//!
//! ```text
//! key package   kind 443  signed by identity     content = hex(key package)
//! group message kind 445  signed by ephemeral    content = hex(group cipher(MLS message))
//!   chat rumor  kind 9    unsigned, the MLS application plaintext
//! invitation    kind 1059 signed by ephemeral, p = recipient
//!   seal        kind 13   signed by sender       direct cipher inside the wrap
//!     rumor     kind 444  unsigned               content = hex(welcome)
//! ```
//!
//! Group messages never reveal the sender: the signing key is thrown away
//! after one use and the payload is only readable with the epoch's exporter
//! secret. Invitations reveal only the recipient.

use burrow_core::{Environment, Identity, identity::x25519_public};
use burrow_crypto::{
    NONCE_SIZE, X25519PublicKey, decrypt_direct, decrypt_group, encrypt_direct, encrypt_group,
};
use burrow_proto::{
    CipherSuite, Event, EventBuilder, GROUP_METADATA_EXTENSION_TYPE, LAST_RESORT_EXTENSION_TYPE,
    PublicKey,
    kinds::{self, tag},
};
use ed25519_dalek::SigningKey;

use crate::error::EnvelopeError;

fn extension_tag(id: u16) -> String {
    format!("{id:#06x}")
}

fn decode_hex(content: &str) -> Result<Vec<u8>, EnvelopeError> {
    hex::decode(content).map_err(|e| EnvelopeError::Content(e.to_string()))
}

fn ensure_kind(event: &Event, expected: u16) -> Result<(), EnvelopeError> {
    if event.kind == expected {
        Ok(())
    } else {
        Err(EnvelopeError::WrongKind { expected, actual: event.kind })
    }
}

fn exchange_key(key: &PublicKey) -> Result<X25519PublicKey, EnvelopeError> {
    x25519_public(key).map_err(|e| EnvelopeError::InvalidKey(e.to_string()))
}

fn decode_event(bytes: Vec<u8>) -> Result<Event, EnvelopeError> {
    let json = String::from_utf8(bytes).map_err(|e| EnvelopeError::Content(e.to_string()))?;
    Ok(Event::from_json(&json)?)
}

/// Signed key package announcement.
pub fn key_package_event(
    identity: &Identity,
    key_package: &[u8],
    suite: CipherSuite,
    relays: &[String],
    created_at: u64,
) -> Event {
    EventBuilder::new(kinds::KEY_PACKAGE, hex::encode(key_package), created_at)
        .tag([tag::PROTOCOL_VERSION, kinds::PROTOCOL_VERSION])
        .tag([tag::CIPHERSUITE.to_string(), suite.tag()])
        .tag([
            tag::EXTENSIONS.to_string(),
            extension_tag(GROUP_METADATA_EXTENSION_TYPE),
            extension_tag(LAST_RESORT_EXTENSION_TYPE),
        ])
        .tag(std::iter::once(tag::RELAYS.to_string()).chain(relays.iter().cloned()))
        .tag([tag::ENCODING, kinds::ENCODING_HEX])
        .sign(identity.signing_key())
}

/// Verify an announcement and return the TLS-serialized key package.
pub fn open_key_package(event: &Event) -> Result<Vec<u8>, EnvelopeError> {
    ensure_kind(event, kinds::KEY_PACKAGE)?;
    event.verify()?;
    decode_hex(&event.content)
}

/// Encrypt an MLS message for the group and wrap it in a one-time-signed
/// envelope tagged with the wire group id.
pub fn group_message_event<E: Environment>(
    env: &E,
    group_id_hex: &str,
    exporter_key: &[u8; 32],
    mls_message: &[u8],
) -> Event {
    let nonce = env.random_array::<NONCE_SIZE>();
    let ciphertext = encrypt_group(exporter_key, mls_message, nonce);
    let ephemeral = SigningKey::from_bytes(&env.random_array::<32>());

    EventBuilder::new(kinds::GROUP_MESSAGE, hex::encode(ciphertext), env.wall_clock_secs())
        .tag([tag::GROUP, group_id_hex])
        .sign(&ephemeral)
}

/// Wire group id a group envelope is addressed to.
pub fn group_id_of(event: &Event) -> Result<&str, EnvelopeError> {
    event.group_tag().ok_or(EnvelopeError::MissingTag(tag::GROUP))
}

/// Verify a group envelope and decrypt the MLS message inside.
pub fn open_group_message(event: &Event, exporter_key: &[u8; 32]) -> Result<Vec<u8>, EnvelopeError> {
    ensure_kind(event, kinds::GROUP_MESSAGE)?;
    event.verify()?;
    let ciphertext = decode_hex(&event.content)?;
    Ok(decrypt_group(exporter_key, &ciphertext)?)
}

/// Unsigned chat message, the plaintext of an MLS application message.
pub fn chat_rumor(author: PublicKey, group_id_hex: &str, content: &str, created_at: u64) -> Event {
    EventBuilder::new(kinds::CHAT_MESSAGE, content, created_at)
        .tag([tag::GROUP, group_id_hex])
        .rumor(author)
}

/// Unsigned invitation carrying a welcome.
pub fn welcome_rumor(
    author: PublicKey,
    welcome: &[u8],
    key_package_event_id: &str,
    relays: &[String],
    created_at: u64,
) -> Event {
    EventBuilder::new(kinds::WELCOME, hex::encode(welcome), created_at)
        .tag([tag::EVENT, key_package_event_id])
        .tag(std::iter::once(tag::RELAYS.to_string()).chain(relays.iter().cloned()))
        .tag([tag::ENCODING, kinds::ENCODING_HEX])
        .rumor(author)
}

/// Welcome bytes from an invitation rumor.
pub fn open_welcome_rumor(rumor: &Event) -> Result<Vec<u8>, EnvelopeError> {
    ensure_kind(rumor, kinds::WELCOME)?;
    rumor.verify_id()?;
    decode_hex(&rumor.content)
}

/// Seal `rumor` from `sender` and gift-wrap it for `recipient`.
pub fn gift_wrap<E: Environment>(
    env: &E,
    sender: &Identity,
    recipient: &PublicKey,
    rumor: &Event,
) -> Result<Event, EnvelopeError> {
    let recipient_x = exchange_key(recipient)?;
    let created_at = env.wall_clock_secs();

    let rumor_json = rumor.to_json()?;
    let sealed = encrypt_direct(
        &sender.x25519_secret(),
        &recipient_x,
        rumor_json.as_bytes(),
        env.random_array(),
    )?;
    let seal = EventBuilder::new(kinds::SEAL, hex::encode(sealed), created_at)
        .sign(sender.signing_key());

    let ephemeral = Identity::from_secret_bytes(&env.random_array());
    let seal_json = seal.to_json()?;
    let wrapped = encrypt_direct(
        &ephemeral.x25519_secret(),
        &recipient_x,
        seal_json.as_bytes(),
        env.random_array(),
    )?;

    Ok(EventBuilder::new(kinds::GIFT_WRAP, hex::encode(wrapped), created_at)
        .tag([tag::RECIPIENT.to_string(), recipient.to_hex()])
        .sign(ephemeral.signing_key()))
}

/// Open a gift wrap addressed to `recipient`.
///
/// Returns the seal signer and the rumor. The rumor author must be the
/// seal signer, otherwise anyone could forge invitations in another name.
pub fn unwrap_gift(recipient: &Identity, wrap: &Event) -> Result<(PublicKey, Event), EnvelopeError> {
    ensure_kind(wrap, kinds::GIFT_WRAP)?;
    wrap.verify()?;
    let secret = recipient.x25519_secret();

    let seal = decode_event(decrypt_direct(
        &secret,
        &exchange_key(&wrap.pubkey)?,
        &decode_hex(&wrap.content)?,
    )?)?;
    ensure_kind(&seal, kinds::SEAL)?;
    seal.verify()?;

    let rumor = decode_event(decrypt_direct(
        &secret,
        &exchange_key(&seal.pubkey)?,
        &decode_hex(&seal.content)?,
    )?)?;
    rumor.verify_id()?;

    if rumor.pubkey != seal.pubkey {
        return Err(EnvelopeError::AuthorMismatch);
    }
    Ok((seal.pubkey, rumor))
}
