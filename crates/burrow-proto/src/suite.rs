//! Supported MLS ciphersuites.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DecodeError;

/// Closed set of ciphersuites a Burrow client will negotiate.
///
/// Each suite maps to its RFC 9420 numeric id. The id is what appears in the
/// `mls_ciphersuite` tag of key package announcements, formatted as `0x0001`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CipherSuite {
    /// `MLS_128_DHKEMX25519_AES128GCM_SHA256_Ed25519`
    #[default]
    X25519Aes128GcmEd25519,
    /// `MLS_128_DHKEMP256_AES128GCM_SHA256_P256`
    P256Aes128GcmP256,
    /// `MLS_128_DHKEMX25519_CHACHA20POLY1305_SHA256_Ed25519`
    X25519ChaCha20Ed25519,
}

impl CipherSuite {
    /// All supported suites, default first.
    pub const ALL: [Self; 3] =
        [Self::X25519Aes128GcmEd25519, Self::P256Aes128GcmP256, Self::X25519ChaCha20Ed25519];

    /// RFC 9420 numeric id.
    pub const fn id(self) -> u16 {
        match self {
            Self::X25519Aes128GcmEd25519 => 0x0001,
            Self::P256Aes128GcmP256 => 0x0002,
            Self::X25519ChaCha20Ed25519 => 0x0003,
        }
    }

    /// IANA name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::X25519Aes128GcmEd25519 => "MLS_128_DHKEMX25519_AES128GCM_SHA256_Ed25519",
            Self::P256Aes128GcmP256 => "MLS_128_DHKEMP256_AES128GCM_SHA256_P256",
            Self::X25519ChaCha20Ed25519 => "MLS_128_DHKEMX25519_CHACHA20POLY1305_SHA256_Ed25519",
        }
    }

    /// Tag value used in relay envelopes, e.g. `0x0001`.
    pub fn tag(self) -> String {
        format!("{:#06x}", self.id())
    }

    /// Look up a suite by numeric id.
    pub fn from_id(id: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherSuite {
    type Err = DecodeError;

    /// Accepts the IANA name or the hex tag (`0x0001`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(suite) = Self::ALL.into_iter().find(|suite| suite.name() == s) {
            return Ok(suite);
        }
        s.strip_prefix("0x")
            .and_then(|digits| u16::from_str_radix(digits, 16).ok())
            .and_then(Self::from_id)
            .ok_or_else(|| DecodeError::UnknownCipherSuite(s.to_string()))
    }
}

impl Serialize for CipherSuite {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for CipherSuite {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
