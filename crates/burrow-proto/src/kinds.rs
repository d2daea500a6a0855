//! Envelope kinds and tag names.
//!
//! These values are shared with other implementations of the protocol and
//! must not change.

/// Inner chat message, unsigned, nested in group ciphertext.
pub const CHAT_MESSAGE: u16 = 9;

/// Seal: sender-signed, direct-encrypted rumor.
pub const SEAL: u16 = 13;

/// Key package announcement, signed by the identity.
pub const KEY_PACKAGE: u16 = 443;

/// Invitation carrying an MLS welcome, always unsigned.
pub const WELCOME: u16 = 444;

/// Group ciphertext, signed by a one-time ephemeral key.
pub const GROUP_MESSAGE: u16 = 445;

/// Gift wrap addressed to a single recipient.
pub const GIFT_WRAP: u16 = 1059;

/// Tag names used on Burrow envelopes.
pub mod tag {
    /// Wire group id on group ciphertext and chat rumors
    pub const GROUP: &str = "h";
    /// Recipient on gift wraps
    pub const RECIPIENT: &str = "p";
    /// Referenced event (the consumed key package on welcomes)
    pub const EVENT: &str = "e";
    /// MLS protocol version
    pub const PROTOCOL_VERSION: &str = "mls_protocol_version";
    /// Ciphersuite id tag
    pub const CIPHERSUITE: &str = "mls_ciphersuite";
    /// Supported extension ids
    pub const EXTENSIONS: &str = "mls_extensions";
    /// Relay list
    pub const RELAYS: &str = "relays";
    /// Content encoding marker
    pub const ENCODING: &str = "encoding";
}

/// Value of the `mls_protocol_version` tag.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Value of the `encoding` tag.
pub const ENCODING_HEX: &str = "hex";
