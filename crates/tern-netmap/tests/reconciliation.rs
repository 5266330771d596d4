//! End-to-end reconciliation and parameters-update scenarios against a
//! canned loopback registry.

mod support;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use support::{TestRegistry, Zone};
use tern_netmap::types::{
    hash_of_signed, ContentHash, NetworkMap, NetworkParameters, ParametersUpdate,
};
use tern_netmap::updater::PARAMETERS_UPDATE_FILENAME;
use tern_netmap::{
    DirectoryWatcher, InMemoryNodeInfoCache, NetworkMapClient, NetworkMapUpdater, NodeInfoCache,
    NodeInfoWatcher,
};
use tern_pki::SignedWith;

/// How long to give the updater's executor thread to run one poll.
const SETTLE: Duration = Duration::from_millis(700);

fn make_updater(
    zone: &Zone,
    registry: &TestRegistry,
    params_hash: ContentHash,
    dir: &std::path::Path,
) -> (
    NetworkMapUpdater,
    Arc<InMemoryNodeInfoCache>,
    Arc<DirectoryWatcher>,
) {
    let cache = Arc::new(InMemoryNodeInfoCache::new());
    let watcher = Arc::new(DirectoryWatcher::new(&dir.join("nodeinfos")).unwrap());
    let client = NetworkMapClient::new(registry.url(), zone.trusted_root());
    let updater = NetworkMapUpdater::new(
        cache.clone(),
        watcher.clone(),
        Some(client),
        params_hash,
        dir,
    )
    .unwrap();
    (updater, cache, watcher)
}

#[test]
fn happy_reconciliation_adds_missing_and_keeps_watcher_owned() {
    let zone = Zone::new();
    let registry = TestRegistry::start();
    let dir = tempfile::tempdir().unwrap();
    let params_hash = ContentHash::of(b"zone-params");

    // Zone advertises h1 and h2.
    let n1 = zone.signed_node("O=Bank A, C=GB", 1);
    let n2 = zone.signed_node("O=Bank B, C=GB", 1);
    let h1 = registry.add_node_info(&n1);
    let h2 = registry.add_node_info(&n2);
    let map = NetworkMap {
        node_info_hashes: vec![h1.clone(), h2.clone()],
        network_parameter_hash: params_hash.clone(),
        parameters_update: None,
    };
    registry.set_map(zone.signed_map(&map), Some("max-age=300"));

    let (mut updater, cache, watcher) = make_updater(&zone, &registry, params_hash, dir.path());

    // h1 is already cached; h3 came in through the file watcher.
    cache.add_node(h1.clone(), n1.unverified().unwrap());
    let n3 = zone.signed_node("O=Bank C, C=GB", 1);
    watcher.save_to_file(&n3).unwrap();
    watcher.scan().unwrap();
    let h3 = hash_of_signed(&n3);
    cache.add_node(h3.clone(), n3.unverified().unwrap());

    updater.subscribe_to_network_map().unwrap();
    std::thread::sleep(SETTLE);

    let hashes = cache.all_hashes();
    assert!(hashes.contains(&h1), "previously cached peer kept");
    assert!(hashes.contains(&h2), "missing peer downloaded");
    assert!(hashes.contains(&h3), "watcher-owned peer retained");
    assert_eq!(hashes.len(), 3);
    assert!(cache.node_by_legal_identity("O=Bank B, C=GB").is_some());

    updater.close();
}

#[test]
fn transient_node_info_failure_skips_entry_and_continues() {
    let zone = Zone::new();
    let registry = TestRegistry::start();
    let dir = tempfile::tempdir().unwrap();
    let params_hash = ContentHash::of(b"zone-params");

    let n1 = zone.signed_node("O=Bank A, C=GB", 1);
    let n2 = zone.signed_node("O=Bank B, C=GB", 1);
    let h1 = registry.add_node_info(&n1);
    let h2 = registry.add_node_info(&n2);
    registry
        .state
        .lock()
        .unwrap()
        .broken_node_infos
        .push(h2.to_string());

    let map = NetworkMap {
        node_info_hashes: vec![h1.clone(), h2.clone()],
        network_parameter_hash: params_hash.clone(),
        parameters_update: None,
    };
    registry.set_map(zone.signed_map(&map), Some("max-age=300"));

    let (mut updater, cache, _watcher) = make_updater(&zone, &registry, params_hash, dir.path());
    updater.subscribe_to_network_map().unwrap();
    std::thread::sleep(SETTLE);

    let hashes = cache.all_hashes();
    assert!(hashes.contains(&h1), "healthy entry still added");
    assert!(!hashes.contains(&h2), "failing entry skipped");

    updater.close();
}

#[test]
fn parameters_update_lifecycle_track_accept_ack() {
    let zone = Zone::new();
    let registry = TestRegistry::start();
    let dir = tempfile::tempdir().unwrap();
    let params_hash = ContentHash::of(b"zone-params");

    // Zone announces an update to v2 parameters.
    let new_params = NetworkParameters {
        epoch: 2,
        min_platform_version: 4,
        max_message_size: 10 * 1024 * 1024,
        max_transaction_size: 512 * 1024,
        modified_time: Utc::now(),
    };
    let signed_params = SignedWith::sign(&new_params, &zone.map_key, zone.map_cert.clone()).unwrap();
    let new_hash = ContentHash::of(&signed_params.raw);
    registry.state.lock().unwrap().parameters.insert(
        new_hash.to_string(),
        serde_json::to_vec(&signed_params).unwrap(),
    );

    let flag_day = Utc::now() + chrono::Duration::days(14);
    let map = NetworkMap {
        node_info_hashes: vec![],
        network_parameter_hash: params_hash.clone(),
        parameters_update: Some(ParametersUpdate {
            new_parameters_hash: new_hash.clone(),
            description: "raise message size".to_string(),
            update_deadline: flag_day,
        }),
    };
    registry.set_map(zone.signed_map(&map), Some("max-age=300"));

    let (mut updater, _cache, _watcher) = make_updater(&zone, &registry, params_hash, dir.path());
    let mut feed = updater.track();
    assert!(feed.current.is_none());

    updater.subscribe_to_network_map().unwrap();
    std::thread::sleep(SETTLE);

    // The live feed saw the announcement, and a fresh snapshot carries it.
    let event = feed.updates.try_recv().unwrap();
    assert_eq!(event.hash, new_hash);
    assert_eq!(event.parameters, new_params);
    assert_eq!(event.update_deadline, flag_day);

    let snapshot = updater.track();
    assert_eq!(snapshot.current.unwrap().hash, new_hash);

    // Operator consents.
    let signature = b"operator-signature".to_vec();
    updater
        .accept_network_parameters(&new_hash, |_| signature.clone())
        .unwrap();
    std::thread::sleep(SETTLE);

    let persisted = std::fs::read(dir.path().join(PARAMETERS_UPDATE_FILENAME)).unwrap();
    let persisted: SignedWith<NetworkParameters> = serde_json::from_slice(&persisted).unwrap();
    assert_eq!(persisted.unverified().unwrap(), new_params);
    assert_eq!(registry.acks(), 1, "exactly one ack posted");

    updater.close();
}

#[test]
fn accepting_an_unseen_hash_is_rejected_without_side_effects() {
    let zone = Zone::new();
    let registry = TestRegistry::start();
    let dir = tempfile::tempdir().unwrap();
    let params_hash = ContentHash::of(b"zone-params");

    let map = NetworkMap {
        node_info_hashes: vec![],
        network_parameter_hash: params_hash.clone(),
        parameters_update: None,
    };
    registry.set_map(zone.signed_map(&map), Some("max-age=300"));

    let (mut updater, _cache, _watcher) = make_updater(&zone, &registry, params_hash, dir.path());
    updater.subscribe_to_network_map().unwrap();
    std::thread::sleep(SETTLE);

    let err = updater.accept_network_parameters(&ContentHash::of(b"never-announced"), |_| vec![1]);
    assert!(matches!(
        err,
        Err(tern_netmap::NetmapError::UpdateConflict(_))
    ));
    assert!(!dir.path().join(PARAMETERS_UPDATE_FILENAME).exists());
    assert_eq!(registry.acks(), 0);

    updater.close();
}

#[test]
fn update_node_info_publishes_once_for_identical_descriptors() {
    let zone = Zone::new();
    let registry = TestRegistry::start();
    let dir = tempfile::tempdir().unwrap();
    let params_hash = ContentHash::of(b"zone-params");

    let map = NetworkMap {
        node_info_hashes: vec![],
        network_parameter_hash: params_hash.clone(),
        parameters_update: None,
    };
    registry.set_map(zone.signed_map(&map), Some("max-age=300"));

    let (mut updater, _cache, _watcher) = make_updater(&zone, &registry, params_hash, dir.path());

    let signed_v1 = zone.signed_node("O=Bank A, C=GB", 1);
    let info_v1 = signed_v1.unverified().unwrap();
    updater
        .update_node_info(info_v1, |_| signed_v1.clone())
        .unwrap();

    // Identical except for serial: must not publish again.
    let signed_v2 = zone.signed_node("O=Bank A, C=GB", 2);
    let info_v2 = signed_v2.unverified().unwrap();
    updater
        .update_node_info(info_v2, |_| signed_v2.clone())
        .unwrap();

    std::thread::sleep(SETTLE);
    assert_eq!(registry.publishes(), 1, "exactly one publish");

    updater.close();
}
