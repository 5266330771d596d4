//! Node-info cache interface and an in-memory implementation.
//!
//! The updater treats every cache call as atomic; thread safety is the
//! implementation's contract. Production nodes back this with their own
//! store; the in-memory map here serves embedders and tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::types::{ContentHash, NodeInfo};

/// The node's local view of zone peers, keyed by descriptor hash.
pub trait NodeInfoCache: Send + Sync {
    /// Look up the current descriptor for a legal identity display name.
    fn node_by_legal_identity(&self, identity: &str) -> Option<NodeInfo>;

    /// Look up a descriptor by its content hash.
    fn node_by_hash(&self, hash: &ContentHash) -> Option<NodeInfo>;

    /// Insert or replace a descriptor under its hash. A node re-publishing
    /// under a new hash replaces its previous descriptor for the same
    /// primary identity.
    fn add_node(&self, hash: ContentHash, info: NodeInfo);

    /// Remove a descriptor.
    fn remove_node(&self, info: &NodeInfo);

    /// All descriptor hashes currently held.
    fn all_hashes(&self) -> HashSet<ContentHash>;
}

#[derive(Default)]
struct CacheInner {
    by_hash: HashMap<ContentHash, NodeInfo>,
}

/// A plain mutex-guarded map. Lookups by identity scan; the cache holds
/// one descriptor per peer, so the scan is over zone size, not history.
#[derive(Default)]
pub struct InMemoryNodeInfoCache {
    inner: Mutex<CacheInner>,
}

impl InMemoryNodeInfoCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NodeInfoCache for InMemoryNodeInfoCache {
    fn node_by_legal_identity(&self, identity: &str) -> Option<NodeInfo> {
        let inner = self.inner.lock().unwrap();
        inner
            .by_hash
            .values()
            .find(|info| info.legal_identities.iter().any(|id| id == identity))
            .cloned()
    }

    fn node_by_hash(&self, hash: &ContentHash) -> Option<NodeInfo> {
        self.inner.lock().unwrap().by_hash.get(hash).cloned()
    }

    fn add_node(&self, hash: ContentHash, info: NodeInfo) {
        let mut inner = self.inner.lock().unwrap();
        // Drop any older descriptor for the same primary identity.
        if let Some(primary) = info.primary_identity() {
            let stale: Vec<ContentHash> = inner
                .by_hash
                .iter()
                .filter(|(h, existing)| {
                    **h != hash && existing.primary_identity() == Some(primary)
                })
                .map(|(h, _)| h.clone())
                .collect();
            for hash in stale {
                inner.by_hash.remove(&hash);
            }
        }
        inner.by_hash.insert(hash, info);
    }

    fn remove_node(&self, info: &NodeInfo) {
        let mut inner = self.inner.lock().unwrap();
        inner.by_hash.retain(|_, existing| existing != info);
    }

    fn all_hashes(&self) -> HashSet<ContentHash> {
        self.inner.lock().unwrap().by_hash.keys().cloned().collect()
    }
}
