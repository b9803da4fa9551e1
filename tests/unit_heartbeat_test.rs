use bytes::Bytes;
use placementd::config::Config;
use placementd::core::PlacementdError;
use placementd::core::RaftCluster;
use placementd::core::region::buckets::BucketStat;
use placementd::core::region::{Peer, PeerRole, RegionEpoch, RegionInfo, RegionMeta};
use placementd::core::services::{
    CountingSyncSink, LocalSchedulingJobs, LocalTsoAllocator, NoopReplicationMode, StaticDiscovery,
};
use placementd::core::storage::Storage;
use placementd::core::storage::memory::MemStorage;
use placementd::core::store::{
    PeerStat, SnapshotStat, StoreConfig, StoreMeta, StoreStats,
};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    cluster: Arc<RaftCluster>,
    storage: Arc<MemStorage>,
    sink: Arc<CountingSyncSink>,
}

fn build() -> Fixture {
    let storage = Arc::new(MemStorage::new());
    let sink = Arc::new(CountingSyncSink::new());
    let cluster = Arc::new(
        RaftCluster::new(
            Config::default(),
            storage.clone(),
            Arc::new(StaticDiscovery::new()),
            Arc::new(LocalTsoAllocator::new()),
            Arc::new(LocalSchedulingJobs::new()),
            sink.clone(),
            Arc::new(NoopReplicationMode),
        )
        .unwrap(),
    );
    Fixture {
        cluster,
        storage,
        sink,
    }
}

fn store_meta(id: u64, addr: &str) -> StoreMeta {
    let mut meta = StoreMeta::new(id, addr);
    meta.version = "7.0.0".to_string();
    meta
}

fn region(id: u64, start: &'static [u8], end: &'static [u8], version: u64) -> RegionInfo {
    let peer = Peer {
        id: id * 100,
        store_id: 1,
        role: PeerRole::Voter,
    };
    let meta = RegionMeta {
        id,
        start_key: Bytes::from_static(start),
        end_key: Bytes::from_static(end),
        epoch: RegionEpoch {
            conf_ver: 1,
            version,
        },
        peers: vec![peer],
    };
    let mut info = RegionInfo::new(meta);
    info.leader = Some(peer);
    info.approximate_size = 10;
    info
}

fn stats(store_id: u64) -> StoreStats {
    StoreStats {
        store_id,
        capacity: 1000,
        available: 800,
        used_size: 200,
        ..StoreStats::default()
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool, what: &str) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

#[tokio::test]
async fn test_unknown_store_heartbeat_is_rejected() {
    let f = build();
    let err = f.cluster.handle_store_heartbeat(stats(99)).await.unwrap_err();
    assert_eq!(err, PlacementdError::StoreNotFound(99));
}

#[tokio::test]
async fn test_snapshot_feedback_clamps_executing_term() {
    let f = build();
    f.cluster.put_meta_store(store_meta(1, "a:1")).await.unwrap();

    // One second of executing time is clamped to the five-second floor:
    // e = 2 * 5 - 20 = -10.
    let mut s = stats(1);
    s.snapshot_stats = vec![SnapshotStat {
        executing_duration: Duration::from_secs(1),
        total_duration: Duration::from_secs(20),
    }];
    f.cluster.handle_store_heartbeat(s).await.unwrap();
    let feedback = f.cluster.get_store(1).unwrap().feedback;
    assert!((feedback + 10.0).abs() < 1e-9);

    // Above the floor the executing term is taken as reported:
    // e = 2 * 8 - 10 = 6.
    let mut s = stats(1);
    s.snapshot_stats = vec![SnapshotStat {
        executing_duration: Duration::from_secs(8),
        total_duration: Duration::from_secs(10),
    }];
    f.cluster.handle_store_heartbeat(s).await.unwrap();
    let feedback = f.cluster.get_store(1).unwrap().feedback;
    assert!((feedback - 6.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_healthy_store_is_told_to_awaken_slow_peers() {
    let f = build();
    f.cluster.put_meta_store(store_meta(1, "a:1")).await.unwrap();
    f.cluster.put_meta_store(store_meta(2, "a:2")).await.unwrap();

    let mut slow = stats(2);
    slow.is_slow = true;
    let resp = f.cluster.handle_store_heartbeat(slow).await.unwrap();
    assert_eq!(resp.awaken_regions, None, "a slow store gets no directive");
    assert!(f.cluster.get_store(2).unwrap().slow);

    let resp = f.cluster.handle_store_heartbeat(stats(1)).await.unwrap();
    assert_eq!(resp.awaken_regions, Some(vec![2]));
    assert!(f.cluster.get_store(1).unwrap().last_awaken.is_some());

    // Once the slow store recovers, the directive disappears.
    f.cluster.handle_store_heartbeat(stats(2)).await.unwrap();
    let resp = f.cluster.handle_store_heartbeat(stats(1)).await.unwrap();
    assert_eq!(resp.awaken_regions, None);
}

#[tokio::test]
async fn test_store_heartbeat_applies_stats() {
    let f = build();
    f.cluster.put_meta_store(store_meta(1, "a:1")).await.unwrap();
    let resp = f.cluster.handle_store_heartbeat(stats(1)).await.unwrap();
    assert_eq!(
        resp.node_state,
        placementd::core::store::NodeState::Preparing
    );

    let store = f.cluster.get_store(1).unwrap();
    assert_eq!(store.stats.capacity, 1000);
    assert_eq!(store.stats.available, 800);
    assert!(store.last_heartbeat.is_some());
}

#[tokio::test]
async fn test_region_heartbeat_pipeline() {
    let f = build();
    f.cluster.bootstrap_cluster().await.unwrap();
    f.cluster.start(false).await.unwrap();
    f.cluster.put_meta_store(store_meta(1, "a:1")).await.unwrap();

    // First heartbeat: unknown region takes the slow path end to end.
    f.cluster
        .process_region_heartbeat(region(100, b"a", b"b", 1))
        .await
        .unwrap();
    let cached = f.cluster.get_region(100).unwrap();
    assert_eq!(cached.epoch().version, 1);

    let basic = f.cluster.basic().clone();
    wait_until(
        || basic.store_region_totals(1) == (1, 10),
        "subtree catch-up after the first heartbeat",
    )
    .await;
    let sink = f.sink.clone();
    wait_until(|| sink.delivered() >= 1, "changed-region delivery").await;

    let cluster_id = f.cluster.cluster_id();
    let mut persisted = false;
    for _ in 0..300 {
        let regions = f.storage.try_load_regions_once(cluster_id).await.unwrap();
        if regions.iter().any(|r| r.id == 100) {
            persisted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(persisted, "region must be persisted to storage");

    // An identical heartbeat takes the fast path and leaves the cache alone.
    f.cluster
        .process_region_heartbeat(region(100, b"a", b"b", 1))
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&cached, &f.cluster.get_region(100).unwrap()));

    // A stale epoch is rejected.
    let mut stale = region(100, b"a", b"b", 1);
    stale.meta.epoch.conf_ver = 0;
    assert!(matches!(
        f.cluster.process_region_heartbeat(stale).await,
        Err(PlacementdError::RegionStaleEpoch { region_id: 100 })
    ));

    // An epoch bump replaces the cached region.
    f.cluster
        .process_region_heartbeat(region(100, b"a", b"b", 2))
        .await
        .unwrap();
    let bumped = f.cluster.get_region(100).unwrap();
    assert!(!Arc::ptr_eq(&cached, &bumped));
    assert_eq!(bumped.epoch().version, 2);

    // Let the bumped epoch reach storage before superseding the region, so
    // the storage assertions below observe one write order.
    let mut bumped_saved = false;
    for _ in 0..300 {
        let regions = f.storage.try_load_regions_once(cluster_id).await.unwrap();
        if regions
            .iter()
            .any(|r| r.id == 100 && r.epoch.version == 2)
        {
            bumped_saved = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(bumped_saved, "epoch bump must reach storage");

    // A wider region supersedes it and the storage copy follows.
    f.cluster
        .process_region_heartbeat(region(200, b"a", b"c", 3))
        .await
        .unwrap();
    assert!(f.cluster.get_region(100).is_err());
    let mut superseded = false;
    for _ in 0..300 {
        let regions = f.storage.try_load_regions_once(cluster_id).await.unwrap();
        if regions.iter().any(|r| r.id == 200) && !regions.iter().any(|r| r.id == 100) {
            superseded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(superseded, "superseded region must be deleted from storage");

    f.cluster.stop().await.unwrap();
}

#[tokio::test]
async fn test_region_heartbeat_requires_a_known_leader() {
    let f = build();
    f.cluster.put_meta_store(store_meta(1, "a:1")).await.unwrap();

    let mut leaderless = region(1, b"a", b"b", 1);
    leaderless.leader = None;
    assert!(matches!(
        f.cluster.process_region_heartbeat(leaderless).await,
        Err(PlacementdError::InvalidRequest(_))
    ));

    let mut foreign = region(2, b"b", b"c", 1);
    foreign.leader = Some(Peer {
        id: 9,
        store_id: 77,
        role: PeerRole::Voter,
    });
    assert!(matches!(
        f.cluster.process_region_heartbeat(foreign).await,
        Err(PlacementdError::NoStoreForRegionLeader(2))
    ));
}

#[tokio::test]
async fn test_buckets_inherited_across_epoch_bump_when_enabled() {
    let f = build();
    f.cluster.bootstrap_cluster().await.unwrap();
    f.cluster.start(false).await.unwrap();
    f.cluster.put_meta_store(store_meta(1, "a:1")).await.unwrap();
    f.cluster.set_store_config(StoreConfig {
        enable_region_bucket: true,
        ..StoreConfig::default()
    });

    f.cluster
        .process_region_heartbeat(region(100, b"a", b"b", 1))
        .await
        .unwrap();
    f.cluster
        .process_report_buckets(BucketStat::new(
            100,
            1,
            vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")],
        ))
        .unwrap();

    f.cluster
        .process_region_heartbeat(region(100, b"a", b"b", 2))
        .await
        .unwrap();
    let buckets = f.cluster.get_region(100).unwrap().buckets();
    assert_eq!(buckets.unwrap().version, 1, "buckets follow the region");

    // With the feature off, a replacement region drops the buckets.
    f.cluster.set_store_config(StoreConfig::default());
    f.cluster
        .process_region_heartbeat(region(100, b"a", b"b", 3))
        .await
        .unwrap();
    assert!(f.cluster.get_region(100).unwrap().buckets().is_none());

    f.cluster.stop().await.unwrap();
}

#[tokio::test]
async fn test_hot_peers_are_observed_and_reconciled() {
    let f = build();
    f.cluster.bootstrap_cluster().await.unwrap();
    f.cluster.start(false).await.unwrap();
    f.cluster.put_meta_store(store_meta(1, "a:1")).await.unwrap();

    let mut s = stats(1);
    s.peer_stats = vec![
        PeerStat {
            region_id: 100,
            read_bytes: 1000,
            read_keys: 10,
        },
        PeerStat {
            region_id: 101,
            read_bytes: 2000,
            read_keys: 20,
        },
    ];
    f.cluster.handle_store_heartbeat(s).await.unwrap();
    let basic = f.cluster.basic().clone();
    wait_until(|| basic.hot_peer_count() == 2, "hot peers observed").await;

    // The next report no longer mentions region 101.
    let mut s = stats(1);
    s.peer_stats = vec![PeerStat {
        region_id: 100,
        read_bytes: 1000,
        read_keys: 10,
    }];
    f.cluster.handle_store_heartbeat(s).await.unwrap();
    let basic = f.cluster.basic().clone();
    wait_until(|| basic.hot_peer_count() == 1, "cold peer reconciled").await;

    f.cluster.stop().await.unwrap();
}
