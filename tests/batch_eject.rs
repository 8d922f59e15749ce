/// Batch eject integration tests
///
/// End-to-end runs of `DiskSession::eject_all` over a scripted arbiter:
/// device grouping, fan-out of group failures, result ordering, and the
/// totals invariant, with no native disk-arbitration calls involved.
use std::sync::Arc;
use std::time::{Duration, Instant};

use ejecta::{DiskSession, EjectOptions, ErrorKind};
use serial_test::serial;

// Import common test utilities
#[path = "common/mod.rs"]
mod common;

use common::fake_arbiter::{ArbiterCall, FakeArbiter};
use common::fixtures::{deviceless_volume, volume_on};

fn session_with(arbiter: &Arc<FakeArbiter>) -> DiskSession {
    DiskSession::with_arbiter(arbiter.clone())
}

#[tokio::test]
async fn test_empty_batch_makes_no_native_calls() {
    let arbiter = Arc::new(FakeArbiter::new());
    let session = session_with(&arbiter);

    let batch = session.eject_all(&[], EjectOptions::default_eject()).await;

    assert_eq!(batch.total_count, 0);
    assert_eq!(batch.success_count, 0);
    assert_eq!(batch.failed_count, 0);
    assert!(batch.results.is_empty());
    assert_eq!(batch.total_duration_seconds, 0.0);
    assert_eq!(arbiter.total_calls(), 0);
}

#[tokio::test]
async fn test_shared_device_unmounts_and_ejects_once() {
    let arbiter = Arc::new(FakeArbiter::new());
    let session = session_with(&arbiter);
    let volumes = vec![
        volume_on("Data", "disk4s1", "disk4"),
        volume_on("Media", "disk4s2", "disk4"),
    ];

    let batch = session
        .eject_all(&volumes, EjectOptions::default_eject())
        .await;

    assert!(batch.all_succeeded());
    assert_eq!(batch.total_count, 2);
    assert_eq!(arbiter.unmount_device_calls(), 1);
    assert_eq!(arbiter.eject_calls(), 1);
    assert_eq!(arbiter.unmount_volume_calls(), 0);
}

#[tokio::test]
async fn test_results_come_back_in_input_order() {
    // A device pair split around a network share: groups may finish in
    // any order, the report is positional regardless.
    let arbiter = Arc::new(FakeArbiter::new());
    let session = session_with(&arbiter);
    let volumes = vec![
        volume_on("Data", "disk4s1", "disk4"),
        deviceless_volume("media"),
        volume_on("Media", "disk4s2", "disk4"),
    ];

    let batch = session
        .eject_all(&volumes, EjectOptions::default_eject())
        .await;

    let names: Vec<&str> = batch
        .results
        .iter()
        .map(|r| r.volume_name.as_str())
        .collect();
    assert_eq!(names, ["Data", "media", "Media"]);
    assert_eq!(arbiter.unmount_device_calls(), 1);
    assert_eq!(arbiter.eject_calls(), 1);
    assert_eq!(arbiter.unmount_volume_calls(), 1);
}

#[tokio::test]
async fn test_busy_unmount_skips_eject_and_fails_the_group() {
    let arbiter = Arc::new(FakeArbiter::new());
    arbiter.fail_device_unmount("disk4", ErrorKind::Busy);
    let session = session_with(&arbiter);
    let volumes = vec![
        volume_on("Data", "disk4s1", "disk4"),
        volume_on("Media", "disk4s2", "disk4"),
        volume_on("Backup", "disk5s1", "disk5"),
    ];

    let batch = session
        .eject_all(&volumes, EjectOptions::default_eject())
        .await;

    assert_eq!(batch.success_count, 1);
    assert_eq!(batch.failed_count, 2);
    for result in &batch.results[..2] {
        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorKind::Busy));
        assert_eq!(result.error_message.as_deref(), Some("the disk is busy"));
    }
    assert!(batch.results[2].success);

    // The busy device must never see an eject; the healthy one must.
    assert_eq!(arbiter.ejected_devices(), ["disk5"]);
}

#[tokio::test]
async fn test_eject_refusal_after_clean_unmount_is_reported() {
    let arbiter = Arc::new(FakeArbiter::new());
    arbiter.fail_eject("disk4", ErrorKind::NotPermitted);
    let session = session_with(&arbiter);
    let volumes = vec![
        volume_on("Data", "disk4s1", "disk4"),
        volume_on("Media", "disk4s2", "disk4"),
    ];

    let batch = session
        .eject_all(&volumes, EjectOptions::default_eject())
        .await;

    assert_eq!(batch.failed_count, 2);
    for result in &batch.results {
        assert_eq!(result.error, Some(ErrorKind::NotPermitted));
    }
    // The unmount went through and the eject was attempted exactly once.
    assert_eq!(arbiter.unmount_device_calls(), 1);
    assert_eq!(arbiter.eject_calls(), 1);
}

#[tokio::test]
async fn test_unmount_only_leaves_the_device_attached() {
    let arbiter = Arc::new(FakeArbiter::new());
    let session = session_with(&arbiter);
    let volumes = vec![
        volume_on("Data", "disk4s1", "disk4"),
        volume_on("Media", "disk4s2", "disk4"),
    ];

    let batch = session
        .eject_all(&volumes, EjectOptions::unmount_only())
        .await;

    assert!(batch.all_succeeded());
    assert_eq!(arbiter.unmount_volume_calls(), 2);
    assert_eq!(arbiter.unmount_device_calls(), 0);
    assert_eq!(arbiter.eject_calls(), 0);
    assert!(arbiter.calls().contains(&ArbiterCall::UnmountVolume {
        path: "/Volumes/Data".into(),
        force: false,
    }));
}

#[tokio::test]
async fn test_individual_unmount_failures_do_not_stop_the_rest() {
    let arbiter = Arc::new(FakeArbiter::new());
    arbiter.fail_unmount("/Volumes/Media", ErrorKind::ExclusiveAccess);
    let session = session_with(&arbiter);
    let volumes = vec![
        volume_on("Data", "disk4s1", "disk4"),
        volume_on("Media", "disk5s1", "disk5"),
        volume_on("Backup", "disk6s1", "disk6"),
    ];

    let batch = session
        .eject_all(&volumes, EjectOptions::unmount_only())
        .await;

    assert_eq!(batch.success_count, 2);
    assert_eq!(batch.failed_count, 1);
    assert_eq!(batch.results[1].error, Some(ErrorKind::ExclusiveAccess));
    // All three unmounts were attempted despite the refusal.
    assert_eq!(arbiter.unmount_volume_calls(), 3);
}

#[tokio::test]
async fn test_force_reaches_the_backend() {
    let arbiter = Arc::new(FakeArbiter::new());
    let session = session_with(&arbiter);
    let volumes = vec![volume_on("Data", "disk4s1", "disk4")];

    let batch = session
        .eject_all(&volumes, EjectOptions::force_eject())
        .await;

    assert!(batch.all_succeeded());
    assert!(arbiter.calls().contains(&ArbiterCall::UnmountDevice {
        device: "disk4".to_string(),
        force: true,
    }));
}

#[tokio::test]
async fn test_counts_reconcile_with_mixed_outcomes() {
    let arbiter = Arc::new(FakeArbiter::new());
    arbiter.fail_device_unmount("disk4", ErrorKind::Busy);
    let session = session_with(&arbiter);
    let volumes = vec![
        volume_on("Data", "disk4s1", "disk4"),
        volume_on("Media", "disk4s2", "disk4"),
        volume_on("Backup", "disk5s1", "disk5"),
        deviceless_volume("share"),
    ];

    let batch = session
        .eject_all(&volumes, EjectOptions::default_eject())
        .await;

    assert_eq!(batch.total_count, 4);
    assert_eq!(batch.total_count, batch.success_count + batch.failed_count);
    assert_eq!(batch.results.len(), batch.total_count);
    assert!(batch.total_duration_seconds >= 0.0);
    for result in &batch.results {
        assert!(result.duration_seconds >= 0.0);
        assert_eq!(result.success, result.error_message.is_none());
    }
}

#[tokio::test]
#[serial]
async fn test_device_groups_run_concurrently() {
    let arbiter = Arc::new(FakeArbiter::new());
    arbiter.delay_device("disk4", Duration::from_millis(100));
    arbiter.delay_device("disk5", Duration::from_millis(100));
    let session = session_with(&arbiter);
    let volumes = vec![
        volume_on("Data", "disk4s1", "disk4"),
        volume_on("Backup", "disk5s1", "disk5"),
    ];

    let started = Instant::now();
    let batch = session
        .eject_all(&volumes, EjectOptions::default_eject())
        .await;
    let elapsed = started.elapsed();

    assert!(batch.all_succeeded());
    // Two 100ms device stalls overlap on the wall clock; running the
    // groups one after another would need 200ms.
    assert!(elapsed >= Duration::from_millis(100));
    assert!(
        elapsed < Duration::from_millis(190),
        "groups appear to have run serially: {elapsed:?}"
    );
    assert!(batch.total_duration_seconds >= 0.1);
}
