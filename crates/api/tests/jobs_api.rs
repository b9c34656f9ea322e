//! Integration tests for the `/jobs` endpoints.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use common::{body_json, StaticModel, WaitingExtractor};
use melon_core::job::JobKind;
use melon_core::model::ModelTask;
use serde_json::json;

async fn wait_until_idle(app: &common::TestApp, kind: JobKind) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while app.state.runner.running_job(kind).is_some() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("job finished in time");
}

// ---------------------------------------------------------------------------
// Test: triggering a job returns 202; a second trigger conflicts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn trigger_returns_202_then_409_while_running() {
    let app = common::build_test_app_with(Some(Arc::new(WaitingExtractor)), Vec::new()).await;

    let response = app
        .post_json("/api/v1/jobs", json!({ "kind": "extract_features" }))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["data"]["kind"], "extract_features");
    assert_eq!(json["data"]["mode"], "incremental");
    assert_eq!(json["data"]["state"], "running");

    let second = app
        .post_json(
            "/api/v1/jobs",
            json!({ "kind": "extract_features", "mode": "overwrite" }),
        )
        .await;
    assert_eq!(second.status(), StatusCode::CONFLICT);

    let health = body_json(app.get("/health").await).await;
    assert_eq!(health["running_jobs"], 1);

    app.state.runner.cancel_all();
    wait_until_idle(&app, JobKind::ExtractFeatures).await;
}

#[tokio::test]
async fn unknown_kind_is_rejected() {
    let app = common::build_test_app().await;

    let response = app
        .post_json("/api/v1/jobs", json!({ "kind": "retrain_everything" }))
        .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

// ---------------------------------------------------------------------------
// Test: cancel returns 202 and the job ends cancelled
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_running_job() {
    let app = common::build_test_app_with(Some(Arc::new(WaitingExtractor)), Vec::new()).await;
    let started = body_json(
        app.post_json("/api/v1/jobs", json!({ "kind": "extract_features" }))
            .await,
    )
    .await;
    let id = started["data"]["id"].as_str().unwrap().to_string();

    let response = app.post_empty(&format!("/api/v1/jobs/{id}/cancel")).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    wait_until_idle(&app, JobKind::ExtractFeatures).await;

    let job = body_json(app.get(&format!("/api/v1/jobs/{id}")).await).await;
    assert_eq!(job["data"]["state"], "cancelled");

    let again = app.post_empty(&format!("/api/v1/jobs/{id}/cancel")).await;
    assert_eq!(again.status(), StatusCode::CONFLICT);
}

// ---------------------------------------------------------------------------
// Test: finished jobs are listed and recorded as last actions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn finished_training_is_listed_with_last_action() {
    let model = StaticModel::new("rf", ModelTask::Classifier, "ripe", 0.9).into_arc();
    let app = common::build_test_app_with(None, vec![model]).await;

    let started = body_json(
        app.post_json("/api/v1/jobs", json!({ "kind": "train_classifier" }))
            .await,
    )
    .await;
    let id = started["data"]["id"].as_str().unwrap().to_string();
    wait_until_idle(&app, JobKind::TrainClassifier).await;

    let job = body_json(app.get(&format!("/api/v1/jobs/{id}")).await).await;
    assert_eq!(job["data"]["state"], "succeeded");
    assert_eq!(job["data"]["progress_percent"], 100);

    let list = body_json(app.get("/api/v1/jobs?kind=train_classifier").await).await;
    assert_eq!(list["data"].as_array().unwrap().len(), 1);

    let actions = body_json(app.get("/api/v1/jobs/last-actions").await).await;
    let actions = actions["data"].as_array().unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0]["action_key"], "train_classifier");
    assert_eq!(actions[0]["status"], "succeeded");
}

#[tokio::test]
async fn list_with_invalid_kind_returns_400() {
    let app = common::build_test_app().await;

    let response = app.get("/api/v1/jobs?kind=bogus").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Test: unknown jobs return 404 on every per-job route
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_job_returns_404() {
    let app = common::build_test_app().await;
    let id = uuid::Uuid::new_v4();

    assert_eq!(
        app.get(&format!("/api/v1/jobs/{id}")).await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        app.post_empty(&format!("/api/v1/jobs/{id}/cancel"))
            .await
            .status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        app.get(&format!("/api/v1/jobs/{id}/stream")).await.status(),
        StatusCode::NOT_FOUND
    );
}

// ---------------------------------------------------------------------------
// Test: streaming a known job without an upgrade is a bad request
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stream_without_upgrade_returns_400() {
    let model = StaticModel::new("rf", ModelTask::Classifier, "ripe", 0.9).into_arc();
    let app = common::build_test_app_with(None, vec![model]).await;
    let started = body_json(
        app.post_json("/api/v1/jobs", json!({ "kind": "train_classifier" }))
            .await,
    )
    .await;
    let id = started["data"]["id"].as_str().unwrap().to_string();
    wait_until_idle(&app, JobKind::TrainClassifier).await;

    let response = app.get(&format!("/api/v1/jobs/{id}/stream")).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Test: the breaker counts failures and can be reset
// ---------------------------------------------------------------------------

#[tokio::test]
async fn breaker_reset_clears_failures() {
    let app = common::build_test_app().await;

    // No feature extractor is configured, so every extraction fails.
    app.post_json("/api/v1/jobs", json!({ "kind": "extract_features" }))
        .await;
    wait_until_idle(&app, JobKind::ExtractFeatures).await;
    assert_eq!(
        app.state
            .runner
            .consecutive_failures(JobKind::ExtractFeatures),
        1
    );

    let response = app
        .post_empty("/api/v1/jobs/breaker/extract_features/reset")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["kind"], "extract_features");
    assert_eq!(json["data"]["consecutive_failures"], 0);

    let bad = app.post_empty("/api/v1/jobs/breaker/nope/reset").await;
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
}
