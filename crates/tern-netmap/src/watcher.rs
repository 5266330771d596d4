//! Node-info file watching: locally dropped peer descriptors.
//!
//! Operators can place signed descriptors straight into a directory;
//! air-gapped zones exchange them out of band. Hashes that arrived
//! through the watcher are owned locally and are never removed by the
//! remote reconciliation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Mutex;

use crate::types::{hash_of_signed, ContentHash, SignedNodeInfo};

const NODE_INFO_PREFIX: &str = "nodeinfo-";

/// Source of locally discovered node descriptors.
pub trait NodeInfoWatcher: Send + Sync {
    /// Stream of descriptors discovered on disk. Meant to be consumed by
    /// a single subscriber; a later call replaces the earlier stream.
    fn updates(&self) -> Receiver<SignedNodeInfo>;

    /// Persist this node's own signed descriptor next to the watched files.
    fn save_to_file(&self, signed: &SignedNodeInfo) -> std::io::Result<()>;

    /// Hashes that entered through this watcher. The reconciliation loop
    /// treats these as locally owned.
    fn processed_hashes(&self) -> HashSet<ContentHash>;
}

/// Watches a directory of `nodeinfo-<hash>` JSON files.
///
/// Scanning is explicit; callers decide the cadence. Every successfully
/// parsed file is recorded as processed and forwarded to the subscriber.
pub struct DirectoryWatcher {
    dir: PathBuf,
    processed: Mutex<HashSet<ContentHash>>,
    sender: Mutex<Option<Sender<SignedNodeInfo>>>,
}

impl DirectoryWatcher {
    pub fn new(dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            processed: Mutex::new(HashSet::new()),
            sender: Mutex::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scan the directory once, forwarding descriptors not seen before.
    /// Unparseable files are logged and skipped. Returns how many new
    /// descriptors were picked up.
    pub fn scan(&self) -> std::io::Result<usize> {
        let mut picked_up = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(NODE_INFO_PREFIX) || name.ends_with(".tmp") {
                continue;
            }

            let bytes = match std::fs::read(entry.path()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(file = name, error = %e, "Failed to read node info file");
                    continue;
                }
            };
            let signed: SignedNodeInfo = match serde_json::from_slice(&bytes) {
                Ok(signed) => signed,
                Err(e) => {
                    tracing::warn!(file = name, error = %e, "Skipping unparseable node info file");
                    continue;
                }
            };

            let hash = hash_of_signed(&signed);
            {
                let mut processed = self.processed.lock().unwrap();
                if !processed.insert(hash.clone()) {
                    continue;
                }
            }
            picked_up += 1;
            tracing::debug!(file = name, hash = %hash, "Picked up node info from disk");

            if let Some(sender) = self.sender.lock().unwrap().as_ref() {
                // A dropped receiver just means nobody is subscribed yet.
                let _ = sender.send(signed);
            }
        }
        Ok(picked_up)
    }
}

impl NodeInfoWatcher for DirectoryWatcher {
    fn updates(&self) -> Receiver<SignedNodeInfo> {
        let (tx, rx) = std::sync::mpsc::channel();
        *self.sender.lock().unwrap() = Some(tx);
        rx
    }

    fn save_to_file(&self, signed: &SignedNodeInfo) -> std::io::Result<()> {
        let hash = hash_of_signed(signed);
        let path = self.dir.join(format!("{NODE_INFO_PREFIX}{hash}"));
        let json = serde_json::to_vec_pretty(signed)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        tracing::debug!(path = %path.display(), "Node info saved");
        Ok(())
    }

    fn processed_hashes(&self) -> HashSet<ContentHash> {
        self.processed.lock().unwrap().clone()
    }
}
