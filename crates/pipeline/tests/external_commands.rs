//! Models backed by external programs, driven through `sh`.

#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use melon_core::job::{JobKind, JobMode, TerminalStatus};
use melon_core::model::{Model, ModelTask};
use melon_pipeline::external::{CommandModel, CommandSpec};
use melon_pipeline::RunnerConfig;

use common::{harness, harness_with, wait_for_terminal};

fn sh(script: &str) -> CommandSpec {
    CommandSpec::new("sh").arg("-c").arg(script)
}

#[tokio::test]
async fn prediction_reads_the_last_json_line() {
    let model = CommandModel::new(
        "echo",
        ModelTask::Detector,
        "Echo",
        sh(r#"cat > /dev/null; echo "loading weights"; echo '{"label":"melon","confidence":0.7,"boxes":3}'"#),
    );
    let prediction = model.predict(b"not really a jpeg").await.unwrap();
    assert_eq!(prediction.label, "melon");
    assert!((prediction.confidence - 0.7).abs() < 1e-9);
    assert_eq!(prediction.raw["boxes"], 3);
}

#[tokio::test]
async fn failing_and_slow_predictions_are_errors() {
    let failing = CommandModel::new(
        "fail",
        ModelTask::Detector,
        "Fail",
        sh("echo 'weights not found' >&2; exit 3"),
    );
    let err = failing.predict(b"").await.unwrap_err().to_string();
    assert!(err.contains("weights not found"), "{err}");

    let slow = CommandModel::new("slow", ModelTask::Detector, "Slow", sh("exec sleep 30"))
        .with_predict_timeout(Duration::from_millis(200));
    let err = slow.predict(b"").await.unwrap_err().to_string();
    assert!(err.contains("timed out"), "{err}");
}

#[tokio::test]
async fn timeout_covers_a_program_that_never_reads_its_input() {
    let model = CommandModel::new("deaf", ModelTask::Detector, "Deaf", sh("exec sleep 30"))
        .with_predict_timeout(Duration::from_millis(200));
    // Far larger than a pipe buffer.
    let image = vec![0xABu8; 4 * 1024 * 1024];

    let started = std::time::Instant::now();
    let result = tokio::time::timeout(Duration::from_secs(5), model.predict(&image))
        .await
        .expect("prediction gave up on its own");
    let err = result.unwrap_err().to_string();
    assert!(err.contains("timed out"), "{err}");
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn training_streams_progress_and_metrics() {
    let h = harness().await;
    let model = CommandModel::new("rf", ModelTask::Classifier, "Random Forest", sh("exit 1"))
        .with_train(sh(
            r#"cat > /dev/null; echo "epoch 1 50%"; echo "note"; echo '{"accuracy":0.83,"f1_score":0.8}'"#,
        ));
    h.registry.register(Arc::new(model)).await.unwrap();

    let job = h
        .runner
        .trigger(JobKind::TrainClassifier, JobMode::Incremental)
        .await
        .unwrap();
    let (status, _) = wait_for_terminal(&h.runner, job.id).await;
    assert_eq!(status, TerminalStatus::Succeeded);

    let stored = h.runner.get(job.id).await.unwrap();
    assert!(stored.log_tail.iter().any(|l| l == "note"));
    let entries = h.registry.list_models(ModelTask::Classifier).await.unwrap();
    assert_eq!(entries[0].metrics.as_ref().and_then(|m| m.accuracy), Some(0.83));
}

#[tokio::test]
async fn cancelling_training_kills_the_process() {
    let config = RunnerConfig {
        cancel_grace: Duration::from_secs(5),
        ..RunnerConfig::default()
    };
    let h = harness_with(config, None).await;
    let model = CommandModel::new("slow", ModelTask::Detector, "Slow", sh("exit 1"))
        .with_train(sh("exec sleep 30"));
    h.registry.register(Arc::new(model)).await.unwrap();

    let job = h
        .runner
        .trigger(JobKind::TrainDetector, JobMode::Incremental)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.runner.cancel(job.id).await.unwrap();

    let (status, _) = wait_for_terminal(&h.runner, job.id).await;
    assert_eq!(status, TerminalStatus::Cancelled);
}
