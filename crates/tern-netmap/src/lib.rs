//! Tern Netmap: network-map client and reconciliation loop.
//!
//! A node keeps its view of the compatibility zone in sync by polling the
//! central registry: the signed network map is authenticated against the
//! zone's root of trust, missing peer descriptors are fetched and cached,
//! withdrawn ones removed, and two-phase parameter updates are surfaced
//! to the operator for consent ahead of their flag day.

pub mod cache;
pub mod client;
pub mod error;
mod scheduler;
pub mod types;
pub mod updater;
pub mod watcher;

pub use cache::{InMemoryNodeInfoCache, NodeInfoCache};
pub use client::NetworkMapClient;
pub use error::NetmapError;
pub use types::{
    ContentHash, NetworkMap, NetworkParameters, NodeInfo, ParametersUpdate, ParametersUpdateInfo,
    SignedNodeInfo, SignedParametersHash,
};
pub use updater::{NetworkMapUpdater, ParameterUpdateFeed};
pub use watcher::{DirectoryWatcher, NodeInfoWatcher};
