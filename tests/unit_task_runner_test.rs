use placementd::core::runner::{TaskKind, TaskRunner, TaskRunners};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

#[tokio::test]
async fn test_rejects_tasks_before_start_and_after_stop() {
    let runner = TaskRunner::new("test-runner", 2);
    assert!(!runner.submit(1, TaskKind::UpdateSubTree, false, async {}));

    runner.start();
    assert!(runner.submit(1, TaskKind::UpdateSubTree, false, async {}));

    runner.stop(Duration::from_secs(1)).await;
    assert!(!runner.submit(1, TaskKind::UpdateSubTree, false, async {}));
}

#[tokio::test]
async fn test_later_submission_supersedes_queued_task() {
    let runner = TaskRunner::new("test-runner", 4);
    runner.start();

    let gate = Arc::new(Notify::new());
    let ran = Arc::new(AtomicUsize::new(0));

    // Task A occupies the key until the gate opens.
    let gate_a = gate.clone();
    runner.submit(1, TaskKind::UpdateSubTree, false, async move {
        gate_a.notified().await;
    });

    // B queues behind A, then C supersedes B.
    let ran_b = ran.clone();
    runner.submit(1, TaskKind::UpdateSubTree, false, async move {
        ran_b.fetch_add(1, Ordering::SeqCst);
    });
    let ran_c = ran.clone();
    runner.submit(1, TaskKind::UpdateSubTree, false, async move {
        ran_c.fetch_add(10, Ordering::SeqCst);
    });

    gate.notify_one();
    runner.stop(Duration::from_secs(2)).await;
    assert_eq!(
        ran.load(Ordering::SeqCst),
        10,
        "only the superseding task must run"
    );
}

#[tokio::test]
async fn test_retained_task_is_never_superseded() {
    let runner = TaskRunner::new("test-runner", 4);
    runner.start();

    let gate = Arc::new(Notify::new());
    let ran = Arc::new(AtomicUsize::new(0));

    let gate_a = gate.clone();
    runner.submit(1, TaskKind::SyncRegion, false, async move {
        gate_a.notified().await;
    });

    let ran_b = ran.clone();
    runner.submit(1, TaskKind::SyncRegion, true, async move {
        ran_b.fetch_add(1, Ordering::SeqCst);
    });
    let ran_c = ran.clone();
    runner.submit(1, TaskKind::SyncRegion, false, async move {
        ran_c.fetch_add(10, Ordering::SeqCst);
    });

    gate.notify_one();
    runner.stop(Duration::from_secs(2)).await;
    assert_eq!(
        ran.load(Ordering::SeqCst),
        11,
        "a retained task queues instead of being replaced"
    );
}

#[tokio::test]
async fn test_different_keys_run_independently() {
    let runner = TaskRunner::new("test-runner", 4);
    runner.start();

    let ran = Arc::new(AtomicUsize::new(0));
    for region_id in 1..=4u64 {
        let ran = ran.clone();
        runner.submit(region_id, TaskKind::ObserveRegionStats, false, async move {
            ran.fetch_add(1, Ordering::SeqCst);
        });
    }
    runner.stop(Duration::from_secs(2)).await;
    assert_eq!(ran.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_same_key_different_kind_do_not_dedup() {
    let runner = TaskRunner::new("test-runner", 4);
    runner.start();

    let ran = Arc::new(AtomicUsize::new(0));
    let ran_a = ran.clone();
    runner.submit(1, TaskKind::ObserveRegionStats, false, async move {
        ran_a.fetch_add(1, Ordering::SeqCst);
    });
    let ran_b = ran.clone();
    runner.submit(1, TaskKind::SaveRegionToKv, false, async move {
        ran_b.fetch_add(1, Ordering::SeqCst);
    });

    runner.stop(Duration::from_secs(2)).await;
    assert_eq!(ran.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_stop_drains_in_flight_work() {
    let runner = TaskRunner::new("test-runner", 2);
    runner.start();

    let ran = Arc::new(AtomicUsize::new(0));
    let ran2 = ran.clone();
    runner.submit(1, TaskKind::SaveRegionToKv, true, async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        ran2.fetch_add(1, Ordering::SeqCst);
    });

    runner.stop(Duration::from_secs(2)).await;
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert!(runner.is_idle());
}

#[tokio::test]
async fn test_default_runner_set_has_expected_names() {
    let runners = TaskRunners::new();
    assert_eq!(runners.heartbeat.name(), "heartbeat-async");
    assert_eq!(runners.misc.name(), "misc-async");
    assert_eq!(runners.log.name(), "log-async");
    assert_eq!(runners.sync_region.name(), "sync-region-async");
}
