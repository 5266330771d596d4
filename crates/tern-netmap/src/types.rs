//! Data model for the network map, peer descriptors, and parameter updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tern_pki::SignedWith;

/// SHA-256 content hash as a lowercase hex string.
///
/// Signed artifacts are addressed by the hash of their raw serialized
/// bytes, so two envelopes carry the same hash exactly when their signed
/// content is byte-identical.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash raw bytes.
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut s = String::with_capacity(digest.len() * 2);
        for b in digest {
            s.push_str(&format!("{b:02x}"));
        }
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A peer descriptor published to the zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Display names of the legal identities this node hosts. Never empty
    /// for a well-formed descriptor; the first entry is the primary.
    pub legal_identities: Vec<String>,
    /// Reachable endpoints as `host:port`.
    pub addresses: Vec<String>,
    /// Platform version the node runs.
    pub platform_version: u32,
    /// Monotonic per-node timestamp (milliseconds since epoch). Bumped on
    /// every republish so the registry can discard stale descriptors.
    pub serial: i64,
}

impl NodeInfo {
    pub fn primary_identity(&self) -> Option<&str> {
        self.legal_identities.first().map(String::as_str)
    }

    /// Equality for change detection: a republished descriptor differing
    /// only in `serial` is not a real change.
    pub fn eq_ignoring_serial(&self, other: &NodeInfo) -> bool {
        self.legal_identities == other.legal_identities
            && self.addresses == other.addresses
            && self.platform_version == other.platform_version
    }
}

/// A node descriptor signed by its publishing node.
pub type SignedNodeInfo = SignedWith<NodeInfo>;

/// Content hash of a signed descriptor's raw bytes.
pub fn hash_of_signed(signed: &SignedNodeInfo) -> ContentHash {
    ContentHash::of(&signed.raw)
}

/// The signed directory of a compatibility zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkMap {
    /// Hashes of every node descriptor the zone currently advertises.
    pub node_info_hashes: Vec<ContentHash>,
    /// Hash of the parameters the zone currently runs on.
    pub network_parameter_hash: ContentHash,
    /// An announced-but-not-yet-active parameters transition, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parameters_update: Option<ParametersUpdate>,
}

/// An announced transition to new network parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParametersUpdate {
    pub new_parameters_hash: ContentHash,
    pub description: String,
    /// The flag day: when the new parameters become active zone-wide.
    pub update_deadline: DateTime<Utc>,
}

/// Consensus-critical zone settings, addressed by content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkParameters {
    pub epoch: u32,
    pub min_platform_version: u32,
    pub max_message_size: u64,
    pub max_transaction_size: u64,
    pub modified_time: DateTime<Utc>,
}

/// Event emitted to update-feed subscribers when a new parameters update
/// is observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParametersUpdateInfo {
    pub hash: ContentHash,
    pub parameters: NetworkParameters,
    pub description: String,
    pub update_deadline: DateTime<Utc>,
}

/// The operator's signature over an accepted parameters hash, posted back
/// to the registry as consent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedParametersHash {
    pub hash: ContentHash,
    pub signature: Vec<u8>,
}
