mod helpers;

use std::sync::Arc;

use helpers::{public_location, FakeImages, FakeStore};
use image_import::services::reconcile::{ReconciliationSweep, DEFAULT_BATCH_SIZE};

/// Seven imported images, every one backed by a stored object.
fn seeded() -> (Arc<FakeImages>, Arc<FakeStore>, Vec<uuid::Uuid>) {
    let images = Arc::new(FakeImages::default());
    let store = Arc::new(FakeStore::default());
    let mut ids = Vec::new();
    for i in 1..=7 {
        let path = format!("imported/170000000000{i}-0000000{i}-photo{i}.jpg");
        store.insert(&path);
        ids.push(images.seed(&format!("ext-{i}"), &public_location(&path)).id);
    }
    (images, store, ids)
}

#[tokio::test]
async fn test_sweep_removes_record_with_deleted_object() {
    let (images, store, ids) = seeded();
    store.delete("imported/1700000000004-00000004-photo4.jpg");

    let sweep = ReconciliationSweep::new(images.clone(), store.clone(), DEFAULT_BATCH_SIZE);
    let report = sweep.sweep().await.unwrap();

    assert_eq!(report.total_checked, 7);
    assert_eq!(report.removed_count, 1);
    assert_eq!(report.removed_ids, vec![ids[3]]);
    assert!(report.errors.is_empty());

    let remaining: Vec<_> = images.all().into_iter().map(|r| r.id).collect();
    assert_eq!(remaining.len(), 6);
    assert!(!remaining.contains(&ids[3]));
}

#[tokio::test]
async fn test_sweep_is_a_no_op_when_consistent() {
    let (images, store, _) = seeded();

    let report = ReconciliationSweep::new(images.clone(), store, 3)
        .sweep()
        .await
        .unwrap();

    assert_eq!(report.total_checked, 7);
    assert_eq!(report.removed_count, 0);
    assert_eq!(images.all().len(), 7);
}

#[tokio::test]
async fn test_errored_check_never_removes_record() {
    let images = Arc::new(FakeImages::default());
    let store = Arc::new(FakeStore {
        broken_names: ["1-flaky.jpg".to_string()].into_iter().collect(),
        ..FakeStore::default()
    });
    // Neither object exists, but only the second check gives a definitive answer.
    let flaky = images.seed("flaky", &public_location("imported/1-flaky.jpg"));
    let gone = images.seed("gone", &public_location("imported/2-gone.jpg"));

    let report = ReconciliationSweep::new(images.clone(), store, DEFAULT_BATCH_SIZE)
        .sweep()
        .await
        .unwrap();

    assert_eq!(report.removed_ids, vec![gone.id]);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].id, flaky.id);
    assert!(report.errors[0].message.contains("listing timed out"));
    assert_eq!(images.all(), vec![flaky]);
}

#[tokio::test]
async fn test_empty_store_reports_nothing() {
    let report = ReconciliationSweep::new(
        Arc::new(FakeImages::default()),
        Arc::new(FakeStore::default()),
        DEFAULT_BATCH_SIZE,
    )
    .sweep()
    .await
    .unwrap();

    assert_eq!(report.total_checked, 0);
    assert!(report.removed_ids.is_empty());
}
