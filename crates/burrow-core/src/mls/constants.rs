//! Protocol constants and the fixed openmls configuration.

use std::sync::LazyLock;

use burrow_proto::{CipherSuite, GROUP_METADATA_EXTENSION_TYPE};
use openmls::prelude::{Capabilities, Ciphersuite, ExtensionType, MlsGroupJoinConfig};

/// Exporter label for the group cipher key.
pub const EXPORTER_LABEL: &str = "marmot";

/// Exporter context for the group cipher key.
pub const EXPORTER_CONTEXT: &[u8] = b"group-event";

/// Exporter output length for the group cipher key.
pub const EXPORTER_LENGTH: usize = 32;

/// Version of the serialized group state blob.
pub const STATE_VERSION: u16 = 1;

/// Client-side join configuration every group runs with.
///
/// This is not part of the persisted state; [`super::Group::deserialize_state`]
/// reinstalls it on every load.
pub static DEFAULT_JOIN_CONFIG: LazyLock<MlsGroupJoinConfig> =
    LazyLock::new(|| MlsGroupJoinConfig::builder().use_ratchet_tree_extension(true).build());

/// Extension types every Burrow leaf advertises.
pub fn supported_extensions() -> [ExtensionType; 3] {
    [
        ExtensionType::RequiredCapabilities,
        ExtensionType::LastResort,
        ExtensionType::Unknown(GROUP_METADATA_EXTENSION_TYPE),
    ]
}

/// Leaf capabilities for `suite`.
pub fn capabilities(suite: CipherSuite) -> Capabilities {
    Capabilities::new(None, Some(&[ciphersuite(suite)]), Some(&supported_extensions()), None, None)
}

/// openmls ciphersuite for a Burrow suite.
pub fn ciphersuite(suite: CipherSuite) -> Ciphersuite {
    match suite {
        CipherSuite::X25519Aes128GcmEd25519 => {
            Ciphersuite::MLS_128_DHKEMX25519_AES128GCM_SHA256_Ed25519
        },
        CipherSuite::P256Aes128GcmP256 => Ciphersuite::MLS_128_DHKEMP256_AES128GCM_SHA256_P256,
        CipherSuite::X25519ChaCha20Ed25519 => {
            Ciphersuite::MLS_128_DHKEMX25519_CHACHA20POLY1305_SHA256_Ed25519
        },
    }
}
