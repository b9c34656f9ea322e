//! Dataset fingerprint versioning and change-notice acknowledgement.

mod common;

use std::collections::BTreeSet;

use melon_core::dataset_change::ChangeType;
use melon_core::dataset::DatasetSet;
use melon_db::models::change_log::NewChange;

use common::harness;

#[tokio::test]
async fn concurrent_records_get_distinct_consecutive_versions() {
    let h = harness().await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let tracker = h.tracker.clone();
        handles.push(tokio::spawn(async move {
            tracker
                .record(NewChange::new(ChangeType::ImageAdded, format!("img-{i}"), 1))
                .await
                .unwrap()
                .version
        }));
    }
    let mut versions = BTreeSet::new();
    for handle in handles {
        versions.insert(handle.await.unwrap());
    }

    assert_eq!(versions, (1..=20).collect::<BTreeSet<i64>>());
    assert_eq!(h.tracker.current().await.unwrap().version, 20);
    assert_eq!(h.tracker.history(100).await.unwrap().len(), 20);
}

#[tokio::test]
async fn notice_shows_until_acknowledged() {
    let h = harness().await;
    assert!(!h.tracker.notification().await.unwrap().show_notification);

    h.tracker
        .record(NewChange::new(ChangeType::ImageAdded, "dataset/train/a.jpg", 1))
        .await
        .unwrap();
    let notice = h.tracker.notification().await.unwrap();
    assert!(notice.show_notification);
    let summary = notice.summary.unwrap();
    assert_eq!(summary.type_display, "Image Added");
    assert_eq!(summary.items_affected, 1);

    let first = h.tracker.acknowledge(None).await.unwrap();
    let second = h.tracker.acknowledge(None).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.seen_version, 1);
    assert!(!h.tracker.notification().await.unwrap().show_notification);

    h.tracker
        .record(NewChange::new(ChangeType::AnnotationAdded, "dataset/train/a.jpg", 1))
        .await
        .unwrap();
    assert!(h.tracker.notification().await.unwrap().show_notification);
}

#[tokio::test]
async fn acknowledging_an_older_version_keeps_the_notice() {
    let h = harness().await;
    for _ in 0..3 {
        h.tracker
            .record(NewChange::new(ChangeType::ImageRemoved, "refresh", 2))
            .await
            .unwrap();
    }
    let ack = h.tracker.acknowledge(Some(2)).await.unwrap();
    assert_eq!(ack.seen_version, 2);
    assert!(h.tracker.notification().await.unwrap().show_notification);

    // Never moves past the current version.
    let ack = h.tracker.acknowledge(Some(99)).await.unwrap();
    assert_eq!(ack.seen_version, 3);
}

#[tokio::test]
async fn refresh_records_additions_and_removals() {
    let h = harness().await;
    h.seed_images(&["dataset/train/a.jpg", "dataset/valid/b.jpg", "dataset/notes.txt"])
        .await;
    let fp = h.tracker.current().await.unwrap();
    assert_eq!(fp.last_change_type, Some(ChangeType::ImageAdded));
    assert_eq!(fp.items_affected, 2);

    // A second refresh with nothing new records nothing.
    let report = h.index.refresh().await.unwrap();
    assert_eq!((report.added, report.removed, report.total), (0, 0, 2));
    assert_eq!(h.tracker.current().await.unwrap().version, fp.version);

    let added = h
        .index
        .add_image(DatasetSet::Test, "c.jpg", vec![1, 2, 3])
        .await
        .unwrap();
    assert_eq!(added.path, "dataset/test/c.jpg");
    let stats = h.index.stats().await.unwrap();
    assert_eq!(stats.iter().map(|s| s.total).sum::<i64>(), 3);
}
