//! Fan-out prediction, majority verdicts, and metric ranking.

mod common;

use std::sync::Arc;
use std::time::Duration;

use melon_core::aggregation::Verdict;
use melon_core::model::{ModelTask, PrimaryMetric};
use melon_pipeline::ModelRegistry;

use common::{harness, metrics, Behavior, FakeModel};

fn image() -> Arc<[u8]> {
    Arc::from(vec![0xFFu8, 0xD8, 0xFF].into_boxed_slice())
}

#[tokio::test]
async fn misbehaving_models_do_not_affect_the_others() {
    let h = harness().await;
    for model in [
        FakeModel::new("a_yolo", ModelTask::Detector, "melon", 0.9),
        FakeModel::new("b_rcnn", ModelTask::Detector, "melon", 0.6),
        FakeModel::new("c_ssd", ModelTask::Detector, "non_melon", 0.95),
        FakeModel::new("d_broken", ModelTask::Detector, "melon", 0.5).behaving(Behavior::Fail),
        FakeModel::new("e_panics", ModelTask::Detector, "melon", 0.5).behaving(Behavior::Panic),
    ] {
        h.registry.register(model.into_arc()).await.unwrap();
    }

    let report = h.registry.predict(ModelTask::Detector, image()).await;
    assert_eq!(report.results.len(), 5);

    let keys: Vec<_> = report.results.iter().map(|r| r.model_key.as_str()).collect();
    assert_eq!(keys, vec!["a_yolo", "b_rcnn", "c_ssd", "d_broken", "e_panics"]);

    assert!(report.results[3].prediction.is_none());
    assert!(report.results[3].error.as_deref().unwrap().contains("weights missing"));
    assert_eq!(
        report.results[4].error.as_deref(),
        Some("model panicked during prediction")
    );

    assert_eq!(report.vote.verdict, Verdict::Decided("melon".into()));
    assert_eq!(report.vote.agreement_count, 2);
    assert_eq!(report.vote.total_voting, 3);
    let mean = report.vote.mean_confidence.unwrap();
    assert!((mean - 0.75).abs() < 1e-9);
}

#[tokio::test]
async fn a_hanging_model_times_out_without_holding_up_the_rest() {
    let h = harness().await;
    let registry = ModelRegistry::new(h.pool.clone()).with_model_timeout(Duration::from_millis(100));
    registry
        .register(FakeModel::new("a_fast", ModelTask::Classifier, "ripe", 0.8).into_arc())
        .await
        .unwrap();
    registry
        .register(
            FakeModel::new("b_stuck", ModelTask::Classifier, "unripe", 0.9)
                .behaving(Behavior::Hang)
                .into_arc(),
        )
        .await
        .unwrap();

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        registry.predict(ModelTask::Classifier, image()),
    )
    .await
    .expect("predict returned");

    assert_eq!(report.results.len(), 2);
    assert!(report.results[0].prediction.is_some());
    assert!(report.results[1].error.as_deref().unwrap().contains("no answer within 100ms"));
    assert_eq!(report.vote.verdict, Verdict::Decided("ripe".into()));
    assert_eq!(report.vote.total_voting, 1);
}

#[tokio::test]
async fn no_usable_prediction_is_indeterminate() {
    let h = harness().await;
    h.registry
        .register(
            FakeModel::new("broken", ModelTask::Classifier, "ripe", 0.5)
                .behaving(Behavior::Fail)
                .into_arc(),
        )
        .await
        .unwrap();

    let report = h.registry.predict(ModelTask::Classifier, image()).await;
    assert_eq!(report.vote.verdict, Verdict::Indeterminate);
    assert_eq!(report.vote.total_voting, 0);

    // Tasks are separate.
    let detectors = h.registry.predict(ModelTask::Detector, image()).await;
    assert!(detectors.results.is_empty());
}

#[tokio::test]
async fn best_model_follows_the_primary_metric() {
    let h = harness().await;
    h.registry
        .register(
            FakeModel::new("rf", ModelTask::Classifier, "ripe", 0.9)
                .seeded(metrics(0.80, 0.90))
                .into_arc(),
        )
        .await
        .unwrap();
    h.registry
        .register(
            FakeModel::new("svm", ModelTask::Classifier, "ripe", 0.9)
                .seeded(metrics(0.85, 0.70))
                .into_arc(),
        )
        .await
        .unwrap();
    h.registry
        .register(FakeModel::new("untrained", ModelTask::Classifier, "ripe", 0.9).into_arc())
        .await
        .unwrap();

    // Classifiers rank by accuracy.
    let best = h.registry.best_model(ModelTask::Classifier).await.unwrap().unwrap();
    assert_eq!(best.entry.key, "svm");
    assert!((best.score - 0.85).abs() < 1e-9);

    let ranking = h.registry.ranking(ModelTask::Classifier).await.unwrap();
    assert_eq!(ranking.len(), 2);

    // The same entries ranked by F1 pick the other model.
    let by_f1 = ModelRegistry::new(h.pool.clone())
        .with_primary_metrics(PrimaryMetric::F1, PrimaryMetric::F1);
    let best = by_f1.best_model(ModelTask::Classifier).await.unwrap().unwrap();
    assert_eq!(best.entry.key, "rf");

    assert!(h.registry.best_model(ModelTask::Detector).await.unwrap().is_none());
}

#[tokio::test]
async fn reregistering_keeps_trained_metrics() {
    let h = harness().await;
    let model = || FakeModel::new("rf", ModelTask::Classifier, "ripe", 0.9).seeded(metrics(0.5, 0.5));
    h.registry.register(model().into_arc()).await.unwrap();
    h.registry
        .record_training("rf", &metrics(0.95, 0.9))
        .await
        .unwrap()
        .unwrap();

    let entry = h.registry.register(model().into_arc()).await.unwrap();
    assert_eq!(entry.metrics.and_then(|m| m.accuracy), Some(0.95));
    assert_eq!(h.registry.models_for(ModelTask::Classifier).len(), 1);
}
