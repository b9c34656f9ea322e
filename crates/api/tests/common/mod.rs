#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use melon_api::config::ServerConfig;
use melon_api::router::build_app_router;
use melon_api::state::AppState;
use melon_core::model::{
    FeatureExtractor, JobContext, Metrics, Model, ModelError, ModelTask, Prediction,
    PrimaryMetric,
};
use melon_core::storage::{MemoryStorage, Storage};

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        database_url: "sqlite::memory:".to_string(),
        storage_root: "./storage".into(),
        model_manifest: None,
        job_cancel_grace_secs: 1,
        job_retention_hours: 24,
        job_log_tail_lines: 50,
        job_failure_threshold: 5,
        progress_buffer: 64,
        detector_metric: PrimaryMetric::F1,
        classifier_metric: PrimaryMetric::Accuracy,
        model_timeout_secs: 20,
    }
}

/// A running test application and its state, for seeding and inspection.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub storage: Arc<MemoryStorage>,
}

/// Build the full application router with all middleware layers over an
/// in-memory database and in-memory storage.
pub async fn build_test_app() -> TestApp {
    build_test_app_with(None, Vec::new()).await
}

pub async fn build_test_app_with(
    extractor: Option<Arc<dyn FeatureExtractor>>,
    models: Vec<Arc<dyn Model>>,
) -> TestApp {
    let config = test_config();
    let pool = melon_db::create_memory_pool().await.unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let state = AppState::build(
        pool,
        config.clone(),
        storage.clone() as Arc<dyn Storage>,
        extractor,
    );
    for model in models {
        state.registry.register(model).await.unwrap();
    }
    TestApp {
        router: build_app_router(state.clone(), &config),
        state,
        storage,
    }
}

impl TestApp {
    /// Put images into storage and index them.
    pub async fn seed_images(&self, paths: &[&str]) {
        for path in paths {
            self.storage.put(path, vec![0xFF, 0xD8]).await.unwrap();
        }
        self.state.index.refresh().await.unwrap();
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Method::GET, uri, Body::empty(), None).await
    }

    pub async fn post_json(&self, uri: &str, json: serde_json::Value) -> Response<Body> {
        self.send(
            Method::POST,
            uri,
            Body::from(json.to_string()),
            Some("application/json"),
        )
        .await
    }

    pub async fn post_bytes(&self, uri: &str, bytes: Vec<u8>) -> Response<Body> {
        self.send(
            Method::POST,
            uri,
            Body::from(bytes),
            Some("application/octet-stream"),
        )
        .await
    }

    pub async fn post_empty(&self, uri: &str) -> Response<Body> {
        self.send(Method::POST, uri, Body::empty(), None).await
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Body,
        content_type: Option<&str>,
    ) -> Response<Body> {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(content_type) = content_type {
            request = request.header("content-type", content_type);
        }
        self.router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap()
    }
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Always predicts the same label; trains to fixed metrics.
pub struct StaticModel {
    pub key: &'static str,
    pub task: ModelTask,
    pub label: &'static str,
    pub confidence: f64,
    pub seed: Option<Metrics>,
}

impl StaticModel {
    pub fn new(key: &'static str, task: ModelTask, label: &'static str, confidence: f64) -> Self {
        Self {
            key,
            task,
            label,
            confidence,
            seed: None,
        }
    }

    pub fn seeded(mut self, metrics: Metrics) -> Self {
        self.seed = Some(metrics);
        self
    }

    pub fn into_arc(self) -> Arc<dyn Model> {
        Arc::new(self)
    }
}

#[async_trait]
impl Model for StaticModel {
    fn key(&self) -> &str {
        self.key
    }

    fn task(&self) -> ModelTask {
        self.task
    }

    fn display_name(&self) -> &str {
        self.key
    }

    async fn predict(&self, _image: &[u8]) -> Result<Prediction, ModelError> {
        Ok(Prediction {
            label: self.label.to_string(),
            confidence: self.confidence,
            raw: serde_json::Value::Null,
        })
    }

    async fn train(&self, _ctx: JobContext<'_>) -> Result<Metrics, ModelError> {
        Ok(Metrics {
            accuracy: Some(0.9),
            f1_score: Some(0.9),
            ..Default::default()
        })
    }

    fn metrics(&self) -> Option<Metrics> {
        self.seed.clone()
    }
}

/// Runs until cancelled.
pub struct WaitingExtractor;

#[async_trait]
impl FeatureExtractor for WaitingExtractor {
    async fn run(&self, ctx: JobContext<'_>) -> Result<Metrics, ModelError> {
        ctx.progress.progress(5, "waiting");
        ctx.cancel.cancelled().await;
        Err(ModelError::Cancelled)
    }
}
