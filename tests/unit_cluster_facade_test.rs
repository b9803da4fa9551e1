use placementd::config::Config;
use placementd::core::PlacementdError;
use placementd::core::RaftCluster;
use placementd::core::services::{
    CountingSyncSink, LocalSchedulingJobs, LocalTsoAllocator, NoopReplicationMode, StaticDiscovery,
    TsoAllocator,
};
use placementd::core::storage::Storage;
use placementd::core::storage::memory::MemStorage;
use placementd::core::store::{NodeState, StoreMeta, StoreStats};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    cluster: Arc<RaftCluster>,
    storage: Arc<MemStorage>,
    tso: Arc<LocalTsoAllocator>,
}

fn build(config: Config, storage: Arc<MemStorage>) -> Fixture {
    let tso = Arc::new(LocalTsoAllocator::new());
    let cluster = Arc::new(
        RaftCluster::new(
            config,
            storage.clone(),
            Arc::new(StaticDiscovery::new()),
            tso.clone(),
            Arc::new(LocalSchedulingJobs::new()),
            Arc::new(CountingSyncSink::new()),
            Arc::new(NoopReplicationMode),
        )
        .unwrap(),
    );
    Fixture {
        cluster,
        storage,
        tso,
    }
}

fn store_meta(id: u64, addr: &str, min_ts: u64) -> (StoreMeta, StoreStats) {
    let mut meta = StoreMeta::new(id, addr);
    meta.version = "7.0.0".to_string();
    let stats = StoreStats {
        store_id: id,
        capacity: 100,
        available: 80,
        min_resolved_ts: min_ts,
        ..StoreStats::default()
    };
    (meta, stats)
}

#[tokio::test]
async fn test_start_on_unbootstrapped_cluster() {
    let f = build(Config::default(), Arc::new(MemStorage::new()));
    f.cluster.start(false).await.unwrap();

    assert!(f.cluster.is_running());
    assert!(!f.cluster.is_initialized());
    assert_eq!(f.cluster.get_min_resolved_ts(), u64::MAX);
    assert!(f.tso.is_initialized(), "local TSO runs without keyspace groups");

    f.cluster.stop().await.unwrap();
    assert!(!f.cluster.is_running());
    assert!(!f.tso.is_initialized(), "stop resets the TSO allocator");
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let f = build(Config::default(), Arc::new(MemStorage::new()));
    f.cluster.start(false).await.unwrap();
    f.cluster.start(false).await.unwrap();
    assert!(f.cluster.is_running());
    f.cluster.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let f = build(Config::default(), Arc::new(MemStorage::new()));

    // Stopping a never-started controller is a no-op.
    f.cluster.stop().await.unwrap();
    assert!(!f.cluster.is_running());

    f.cluster.start(false).await.unwrap();
    f.cluster.stop().await.unwrap();
    f.cluster.stop().await.unwrap();
    assert!(!f.cluster.is_running());

    // The controller can come back after a stop.
    f.cluster.start(false).await.unwrap();
    assert!(f.cluster.is_running());
    f.cluster.stop().await.unwrap();
}

#[tokio::test]
async fn test_bootstrap_then_warm_restart_loads_state() {
    let storage = Arc::new(MemStorage::new());
    let f = build(Config::default(), storage.clone());
    f.cluster.bootstrap_cluster().await.unwrap();
    let cluster_id = f.cluster.cluster_id();

    let (meta, _) = store_meta(1, "a:1", 0);
    f.cluster.put_meta_store(meta).await.unwrap();

    // Bootstrapping twice is rejected.
    assert!(f.cluster.bootstrap_cluster().await.is_err());

    // A fresh controller over the same storage picks everything up.
    let restarted = build(Config::default(), storage);
    restarted.cluster.start(false).await.unwrap();
    assert!(restarted.cluster.is_initialized());
    assert_eq!(restarted.cluster.cluster_id(), cluster_id);
    let store = restarted.cluster.get_store(1).unwrap();
    assert_eq!(store.meta.address, "a:1");
    assert_eq!(store.meta.node_state, NodeState::Preparing);
    restarted.cluster.stop().await.unwrap();
}

#[tokio::test]
async fn test_external_ts_is_monotonic() {
    let f = build(Config::default(), Arc::new(MemStorage::new()));
    f.cluster.bootstrap_cluster().await.unwrap();

    assert_eq!(f.cluster.get_external_ts(), 0);
    f.cluster.set_external_ts(5).await.unwrap();
    assert_eq!(f.cluster.get_external_ts(), 5);

    let err = f.cluster.set_external_ts(3).await.unwrap_err();
    assert!(matches!(err, PlacementdError::InvalidRequest(_)));
    assert_eq!(f.cluster.get_external_ts(), 5);

    f.cluster.set_external_ts(7).await.unwrap();
    assert_eq!(
        f.storage
            .load_external_ts(f.cluster.cluster_id())
            .await
            .unwrap(),
        Some(7)
    );
}

#[tokio::test]
async fn test_min_resolved_ts_advances_monotonically() {
    let mut config = Config::default();
    config.min_resolved_ts_persistence_interval = Duration::from_millis(10);
    let f = build(config, Arc::new(MemStorage::new()));
    f.cluster.bootstrap_cluster().await.unwrap();
    f.cluster.start(false).await.unwrap();

    for (id, addr, ts) in [(1u64, "a:1", 100u64), (2, "a:2", 90), (3, "a:3", 120)] {
        let (meta, stats) = store_meta(id, addr, ts);
        f.cluster.put_meta_store(meta).await.unwrap();
        f.cluster.handle_store_heartbeat(stats).await.unwrap();
    }

    wait_for(|| f.cluster.get_min_resolved_ts() == 90, "min ts reaches 90").await;
    assert_eq!(
        f.storage
            .load_min_resolved_ts(f.cluster.cluster_id())
            .await
            .unwrap(),
        Some(90)
    );

    // The laggard catches up; the minimum moves to the next-slowest store.
    let (_, stats) = store_meta(2, "a:2", 150);
    f.cluster.handle_store_heartbeat(stats).await.unwrap();
    wait_for(|| f.cluster.get_min_resolved_ts() == 100, "min ts reaches 100").await;

    // A regressing store cannot move the published value backwards.
    let (_, stats) = store_meta(3, "a:3", 80);
    f.cluster.handle_store_heartbeat(stats).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(f.cluster.get_min_resolved_ts(), 100);

    f.cluster.stop().await.unwrap();
}

#[tokio::test]
async fn test_cluster_version_follows_minimum_store_version() {
    let f = build(Config::default(), Arc::new(MemStorage::new()));
    f.cluster.bootstrap_cluster().await.unwrap();

    for (id, addr, version) in [(1u64, "a:1", "6.5.0"), (2, "a:2", "7.0.0")] {
        let mut meta = StoreMeta::new(id, addr);
        meta.version = version.to_string();
        f.cluster.put_meta_store(meta).await.unwrap();
    }

    f.cluster.on_store_version_change().await;
    assert_eq!(f.cluster.get_cluster_version().to_string(), "6.5.0");
    assert_eq!(
        f.storage.load_meta().await.unwrap().unwrap().version,
        "6.5.0"
    );

    // Re-deriving with an unchanged store set is a no-op.
    f.cluster.on_store_version_change().await;
    assert_eq!(f.cluster.get_cluster_version().to_string(), "6.5.0");
}

#[tokio::test]
async fn test_alloc_id_batches() {
    let f = build(Config::default(), Arc::new(MemStorage::new()));
    let (first, count) = f.cluster.alloc_id(10);
    assert_eq!(count, 10);
    let (next, _) = f.cluster.alloc_id(1);
    assert_eq!(next, first + 10);
}

#[tokio::test]
async fn test_store_weight_is_persisted_then_applied() {
    let f = build(Config::default(), Arc::new(MemStorage::new()));
    f.cluster.bootstrap_cluster().await.unwrap();
    let (meta, _) = store_meta(1, "a:1", 0);
    f.cluster.put_meta_store(meta).await.unwrap();

    f.cluster.set_store_weight(1, 2.0, 0.5).await.unwrap();
    let store = f.cluster.get_store(1).unwrap();
    assert!((store.leader_weight - 2.0).abs() < f64::EPSILON);
    assert!((store.region_weight - 0.5).abs() < f64::EPSILON);

    assert!(matches!(
        f.cluster.set_store_weight(9, 1.0, 1.0).await,
        Err(PlacementdError::StoreNotFound(9))
    ));
}

async fn wait_for(mut cond: impl FnMut() -> bool, what: &str) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}
