use bytes::Bytes;
use placementd::config::Config;
use placementd::core::PlacementdError;
use placementd::core::RaftCluster;
use placementd::core::region::buckets::BucketStat;
use placementd::core::region::{Peer, PeerRole, RegionEpoch, RegionInfo, RegionMeta};
use placementd::core::services::{
    CountingSyncSink, LocalSchedulingJobs, LocalTsoAllocator, NoopReplicationMode, StaticDiscovery,
};
use placementd::core::storage::memory::MemStorage;
use placementd::core::store::StoreMeta;
use std::sync::Arc;

fn build_cluster() -> Arc<RaftCluster> {
    Arc::new(
        RaftCluster::new(
            Config::default(),
            Arc::new(MemStorage::new()),
            Arc::new(StaticDiscovery::new()),
            Arc::new(LocalTsoAllocator::new()),
            Arc::new(LocalSchedulingJobs::new()),
            Arc::new(CountingSyncSink::new()),
            Arc::new(NoopReplicationMode),
        )
        .unwrap(),
    )
}

fn region(id: u64) -> RegionInfo {
    let meta = RegionMeta {
        id,
        start_key: Bytes::from_static(b"a"),
        end_key: Bytes::from_static(b"b"),
        epoch: RegionEpoch {
            conf_ver: 1,
            version: 1,
        },
        peers: vec![Peer {
            id: 100,
            store_id: 1,
            role: PeerRole::Voter,
        }],
    };
    let mut info = RegionInfo::new(meta);
    info.leader = Some(Peer {
        id: 100,
        store_id: 1,
        role: PeerRole::Voter,
    });
    info
}

fn buckets(region_id: u64, version: u64) -> BucketStat {
    BucketStat::new(
        region_id,
        version,
        vec![
            Bytes::from_static(b"a"),
            Bytes::from_static(b"am"),
            Bytes::from_static(b"b"),
        ],
    )
}

async fn seed_region(cluster: &Arc<RaftCluster>) {
    let mut meta = StoreMeta::new(1, "127.0.0.1:20160");
    meta.version = "7.0.0".to_string();
    cluster.put_meta_store(meta).await.unwrap();
    cluster
        .basic()
        .check_and_put_root_tree(Arc::new(region(7)))
        .unwrap();
}

#[tokio::test]
async fn test_report_for_unknown_region_is_an_error() {
    let cluster = build_cluster();
    let err = cluster.process_report_buckets(buckets(42, 1)).unwrap_err();
    assert_eq!(err, PlacementdError::RegionNotFound(42));
}

#[tokio::test]
async fn test_versions_race_newest_wins() {
    let cluster = build_cluster();
    seed_region(&cluster).await;

    cluster.process_report_buckets(buckets(7, 1)).unwrap();
    assert_eq!(cluster.get_region(7).unwrap().buckets().unwrap().version, 1);

    // Concurrent reports with versions 3 and 2: v3 lands, v2 is dropped as
    // stale and must not mutate anything.
    cluster.process_report_buckets(buckets(7, 3)).unwrap();
    cluster.process_report_buckets(buckets(7, 2)).unwrap();
    assert_eq!(cluster.get_region(7).unwrap().buckets().unwrap().version, 3);
}

#[tokio::test]
async fn test_equal_version_report_is_a_no_op() {
    let cluster = build_cluster();
    seed_region(&cluster).await;

    let mut first = buckets(7, 5);
    first.stats.read_bytes = vec![10, 10];
    cluster.process_report_buckets(first).unwrap();

    let mut same_version = buckets(7, 5);
    same_version.stats.read_bytes = vec![99, 99];
    cluster.process_report_buckets(same_version).unwrap();

    let current = cluster.get_region(7).unwrap().buckets().unwrap();
    assert_eq!(current.version, 5);
    assert_eq!(
        current.stats.read_bytes,
        vec![10, 10],
        "an equal-version report must not replace the stats"
    );
}

#[tokio::test]
async fn test_accepted_versions_strictly_increase() {
    let cluster = build_cluster();
    seed_region(&cluster).await;

    let mut last = 0;
    for version in [1u64, 3, 2, 5, 4, 9] {
        cluster.process_report_buckets(buckets(7, version)).unwrap();
        let current = cluster.get_region(7).unwrap().buckets().unwrap().version;
        assert!(current >= last, "bucket versions must never move backwards");
        last = current;
    }
    assert_eq!(last, 9);
}

#[tokio::test]
async fn test_bucket_count_follows_boundary_keys() {
    let stat = buckets(7, 1);
    assert_eq!(stat.bucket_count(), 2);
    let empty = BucketStat::new(7, 1, Vec::new());
    assert_eq!(empty.bucket_count(), 0);
}
