//! The reconciliation loop for one node.
//!
//! Owns a single-threaded executor: map polls, node-info fetches, cache
//! mutations, and retry tasks all run there, serialized in submission
//! order. Locally discovered descriptors flow in from the file watcher
//! and are never removed by remote reconciliation. Parameter updates go
//! through a two-phase announce/accept protocol, with operator consent
//! posted back to the registry ahead of the flag day.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tern_pki::SignedWith;
use tokio::sync::broadcast;

use crate::cache::NodeInfoCache;
use crate::client::NetworkMapClient;
use crate::error::NetmapError;
use crate::scheduler::{Reschedule, SerialScheduler, Task};
use crate::types::{
    hash_of_signed, ContentHash, NetworkParameters, NodeInfo, ParametersUpdate,
    ParametersUpdateInfo, SignedNodeInfo, SignedParametersHash,
};
use crate::watcher::NodeInfoWatcher;

/// Fixed retry interval for failed polls, publishes, and acks.
pub const RETRY_INTERVAL_SECS: u64 = 60;

const RETRY_INTERVAL: Duration = Duration::from_secs(RETRY_INTERVAL_SECS);

/// How long `close()` waits for the executor to drain.
const SHUTDOWN_DRAIN_SECS: u64 = 50;

/// File under the base directory holding accepted-but-not-yet-active
/// parameters.
pub const PARAMETERS_UPDATE_FILENAME: &str = "network-parameters-update";

/// Capacity of the parameters-update broadcast feed.
const FEED_CAPACITY: usize = 16;

/// Snapshot-plus-stream view of announced parameter updates.
pub struct ParameterUpdateFeed {
    /// The update pending at subscription time, if any.
    pub current: Option<ParametersUpdateInfo>,
    /// Live events for updates observed after subscription.
    pub updates: broadcast::Receiver<ParametersUpdateInfo>,
}

struct PendingUpdate {
    update: ParametersUpdate,
    signed: SignedWith<NetworkParameters>,
    info: ParametersUpdateInfo,
}

struct UpdaterShared {
    cache: Arc<dyn NodeInfoCache>,
    watcher: Arc<dyn NodeInfoWatcher>,
    client: Option<Arc<NetworkMapClient>>,
    current_parameters_hash: ContentHash,
    base_directory: PathBuf,
    pending: Mutex<Option<PendingUpdate>>,
    feed_tx: broadcast::Sender<ParametersUpdateInfo>,
}

/// Drives network-map synchronization for one node.
pub struct NetworkMapUpdater {
    shared: Arc<UpdaterShared>,
    scheduler: SerialScheduler,
    subscribed: AtomicBool,
    watcher_stop: Arc<AtomicBool>,
    watcher_thread: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkMapUpdater {
    /// `client` may be absent: the node then runs offline, fed only by
    /// the file watcher. `current_parameters_hash` is the hash of the
    /// parameters this node booted with; `base_directory` receives the
    /// accepted-parameters file.
    pub fn new(
        cache: Arc<dyn NodeInfoCache>,
        watcher: Arc<dyn NodeInfoWatcher>,
        client: Option<NetworkMapClient>,
        current_parameters_hash: ContentHash,
        base_directory: &Path,
    ) -> Result<Self, NetmapError> {
        let (feed_tx, _) = broadcast::channel(FEED_CAPACITY);
        let scheduler = SerialScheduler::new("tern-netmap-updater")?;
        Ok(Self {
            shared: Arc::new(UpdaterShared {
                cache,
                watcher,
                client: client.map(Arc::new),
                current_parameters_hash,
                base_directory: base_directory.to_path_buf(),
                pending: Mutex::new(None),
                feed_tx,
            }),
            scheduler,
            subscribed: AtomicBool::new(false),
            watcher_stop: Arc::new(AtomicBool::new(false)),
            watcher_thread: Mutex::new(None),
        })
    }

    /// Snapshot of the pending parameters update plus the live feed.
    pub fn track(&self) -> ParameterUpdateFeed {
        let pending = self.shared.pending.lock().unwrap();
        ParameterUpdateFeed {
            current: pending.as_ref().map(|p| p.info.clone()),
            updates: self.shared.feed_tx.subscribe(),
        }
    }

    /// Compare-and-publish this node's own descriptor.
    ///
    /// If the cached descriptor for the same primary identity equals the
    /// new one ignoring `serial`, nothing happens. Otherwise the
    /// descriptor is signed, cached, saved to disk, and (when a client is
    /// configured) published to the registry with retries.
    pub fn update_node_info(
        &self,
        info: NodeInfo,
        sign: impl FnOnce(&NodeInfo) -> SignedNodeInfo,
    ) -> Result<(), NetmapError> {
        let identity = info
            .primary_identity()
            .ok_or_else(|| NetmapError::Payload("node info carries no legal identity".into()))?
            .to_string();

        if let Some(previous) = self.shared.cache.node_by_legal_identity(&identity) {
            if previous.eq_ignoring_serial(&info) {
                tracing::debug!(identity, "Node info unchanged; skipping publish");
                return Ok(());
            }
        }

        let signed = sign(&info);
        let hash = hash_of_signed(&signed);
        self.shared.cache.add_node(hash.clone(), info);
        self.shared.watcher.save_to_file(&signed)?;
        tracing::info!(identity, hash = %hash, "Node info updated");

        if let Some(client) = &self.shared.client {
            let client = client.clone();
            let task: Task = Box::new(move || match client.publish(&signed) {
                Ok(()) => {
                    tracing::debug!(hash = %hash, "Node info published");
                    Reschedule::Done
                }
                Err(e) => {
                    tracing::warn!(
                        hash = %hash,
                        error = %e,
                        "Node info publish failed; retrying in {RETRY_INTERVAL_SECS}s"
                    );
                    Reschedule::After(RETRY_INTERVAL)
                }
            });
            self.scheduler.submit_now(task);
        }
        Ok(())
    }

    /// Start synchronizing. Wires the watcher stream into the cache and,
    /// when a client is configured, submits the polling task. May be
    /// called once per updater.
    pub fn subscribe_to_network_map(&self) -> Result<(), NetmapError> {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Err(NetmapError::AlreadySubscribed);
        }

        let rx = self.shared.watcher.updates();
        let stop = self.watcher_stop.clone();
        let cache = self.shared.cache.clone();
        let handle = std::thread::Builder::new()
            .name("tern-netmap-watcher".into())
            .spawn(move || forward_watcher(rx, cache, stop))?;
        *self.watcher_thread.lock().unwrap() = Some(handle);

        if self.shared.client.is_some() {
            let shared = self.shared.clone();
            let task: Task = Box::new(move || match poll_once(&shared) {
                Ok(delay) => Reschedule::After(delay),
                Err(NetmapError::ParametersMismatch {
                    advertised,
                    current,
                }) => {
                    tracing::error!(
                        advertised,
                        current,
                        "Node is running network parameters the zone no longer accepts; \
                         terminating for a supervised restart"
                    );
                    std::process::exit(1);
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Network map poll failed; retrying in {RETRY_INTERVAL_SECS}s"
                    );
                    Reschedule::After(RETRY_INTERVAL)
                }
            });
            self.scheduler.submit_now(task);
        } else {
            tracing::info!("No network-map client configured; running offline");
        }
        Ok(())
    }

    /// Record operator consent for a pending parameters update: persist
    /// the signed parameters under the base directory and post the
    /// operator's signature over the hash back to the registry.
    pub fn accept_network_parameters(
        &self,
        hash: &ContentHash,
        sign: impl FnOnce(&ContentHash) -> Vec<u8>,
    ) -> Result<(), NetmapError> {
        let client = self
            .shared
            .client
            .clone()
            .ok_or(NetmapError::NotConfigured)?;

        let signed = {
            let pending = self.shared.pending.lock().unwrap();
            match pending.as_ref() {
                Some(p) if p.update.new_parameters_hash == *hash => p.signed.clone(),
                _ => return Err(NetmapError::UpdateConflict(hash.to_string())),
            }
        };

        let path = self.shared.base_directory.join(PARAMETERS_UPDATE_FILENAME);
        let bytes =
            serde_json::to_vec_pretty(&signed).map_err(|e| NetmapError::Payload(e.to_string()))?;
        write_atomically(&path, &bytes)?;
        tracing::info!(hash = %hash, path = %path.display(), "Accepted network parameters persisted");

        let ack = SignedParametersHash {
            hash: hash.clone(),
            signature: sign(hash),
        };
        let task: Task = Box::new(move || match client.ack_parameters_update(&ack) {
            Ok(()) => {
                tracing::info!(hash = %ack.hash, "Parameters update acknowledged");
                Reschedule::Done
            }
            Err(e) => {
                tracing::warn!(
                    hash = %ack.hash,
                    error = %e,
                    "Parameters ack failed; retrying in {RETRY_INTERVAL_SECS}s"
                );
                Reschedule::After(RETRY_INTERVAL)
            }
        });
        self.scheduler.submit_now(task);
        Ok(())
    }

    /// Stop the watcher subscription, then drain the executor. Abandoned
    /// retry tasks are safe: republishing a signed descriptor or re-acking
    /// a hash is idempotent.
    pub fn close(&mut self) {
        self.watcher_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.watcher_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        let clean = self
            .scheduler
            .shutdown(Duration::from_secs(SHUTDOWN_DRAIN_SECS));
        if !clean {
            tracing::warn!(
                "Updater executor did not drain within {SHUTDOWN_DRAIN_SECS}s; abandoning tasks"
            );
        }
    }
}

/// Forward watcher-discovered descriptors into the cache until stopped.
fn forward_watcher(
    rx: Receiver<SignedNodeInfo>,
    cache: Arc<dyn NodeInfoCache>,
    stop: Arc<AtomicBool>,
) {
    loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(signed) => {
                let hash = hash_of_signed(&signed);
                match signed.unverified() {
                    Ok(info) => {
                        tracing::debug!(hash = %hash, "Caching node info from file watcher");
                        cache.add_node(hash, info);
                    }
                    Err(e) => {
                        tracing::warn!(hash = %hash, error = %e, "Skipping unparseable watched node info");
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// One reconciliation iteration. Returns the delay until the next poll;
/// any error means the caller retries at the fixed interval, except a
/// parameters mismatch, which is fatal for the node.
fn poll_once(shared: &Arc<UpdaterShared>) -> Result<Duration, NetmapError> {
    let client = shared.client.as_ref().ok_or(NetmapError::NotConfigured)?;
    let (map, cache_timeout) = client.get_network_map()?;

    if let Some(update) = &map.parameters_update {
        handle_parameters_update(shared, client, update);
    }

    if map.network_parameter_hash != shared.current_parameters_hash {
        return Err(NetmapError::ParametersMismatch {
            advertised: map.network_parameter_hash.to_string(),
            current: shared.current_parameters_hash.to_string(),
        });
    }

    let advertised: std::collections::HashSet<ContentHash> =
        map.node_info_hashes.iter().cloned().collect();

    // Fetch descriptors the zone has and we do not. A single failed fetch
    // is logged and skipped; the next poll picks it up again.
    let known = shared.cache.all_hashes();
    for hash in advertised.difference(&known) {
        match client.get_node_info(hash) {
            Ok(info) => {
                tracing::debug!(hash = %hash, "Adding node info from network map");
                shared.cache.add_node(hash.clone(), info);
            }
            Err(e) => {
                tracing::warn!(hash = %hash, error = %e, "Failed to fetch node info; skipping");
            }
        }
    }

    // Drop descriptors the zone no longer advertises, unless they came in
    // through the file watcher. Those are locally owned.
    let watcher_owned = shared.watcher.processed_hashes();
    for hash in shared.cache.all_hashes() {
        if advertised.contains(&hash) || watcher_owned.contains(&hash) {
            continue;
        }
        if let Some(info) = shared.cache.node_by_hash(&hash) {
            tracing::info!(hash = %hash, "Removing node info no longer advertised by the zone");
            shared.cache.remove_node(&info);
        }
    }

    Ok(cache_timeout.unwrap_or(RETRY_INTERVAL))
}

/// React to an announced parameters update: fetch the signed parameters
/// once per hash, remember them as pending, and notify feed subscribers.
fn handle_parameters_update(
    shared: &Arc<UpdaterShared>,
    client: &Arc<NetworkMapClient>,
    update: &ParametersUpdate,
) {
    {
        let pending = shared.pending.lock().unwrap();
        if pending
            .as_ref()
            .is_some_and(|p| p.update.new_parameters_hash == update.new_parameters_hash)
        {
            return;
        }
    }

    let signed = match client.get_network_parameters(&update.new_parameters_hash) {
        Ok(signed) => signed,
        Err(e) => {
            tracing::warn!(
                hash = %update.new_parameters_hash,
                error = %e,
                "Failed to fetch announced network parameters; will retry on next poll"
            );
            return;
        }
    };
    let parameters = match signed.unverified() {
        Ok(parameters) => parameters,
        Err(e) => {
            tracing::warn!(
                hash = %update.new_parameters_hash,
                error = %e,
                "Announced network parameters do not parse; ignoring"
            );
            return;
        }
    };

    let info = ParametersUpdateInfo {
        hash: update.new_parameters_hash.clone(),
        parameters,
        description: update.description.clone(),
        update_deadline: update.update_deadline,
    };
    tracing::info!(
        hash = %info.hash,
        deadline = %info.update_deadline,
        description = %info.description,
        "New network parameters update announced"
    );

    *shared.pending.lock().unwrap() = Some(PendingUpdate {
        update: update.clone(),
        signed,
        info: info.clone(),
    });
    // Send fails only when nobody is subscribed, which is fine.
    let _ = shared.feed_tx.send(info);
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}
