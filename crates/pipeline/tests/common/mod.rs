//! Shared harness for pipeline integration tests: an in-memory database,
//! in-memory storage, and scriptable fake models and extractors.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use melon_core::job::TerminalStatus;
use melon_core::model::{
    FeatureExtractor, JobContext, Metrics, Model, ModelError, ModelTask, Prediction,
};
use melon_core::progress::ProgressEvent;
use melon_core::storage::{MemoryStorage, Storage};
use melon_core::types::JobId;
use melon_db::DbPool;
use melon_events::ProgressBroadcaster;
use melon_pipeline::{
    AnnotationQueue, ChangeTracker, DatasetIndex, JobRunner, ModelRegistry, RunnerConfig,
};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub pool: DbPool,
    pub storage: Arc<MemoryStorage>,
    pub index: DatasetIndex,
    pub queue: AnnotationQueue,
    pub tracker: ChangeTracker,
    pub registry: Arc<ModelRegistry>,
    pub hub: Arc<ProgressBroadcaster>,
    pub runner: Arc<JobRunner>,
}

pub async fn harness() -> Harness {
    harness_with(RunnerConfig::default(), None).await
}

pub async fn harness_with(
    config: RunnerConfig,
    extractor: Option<Arc<dyn FeatureExtractor>>,
) -> Harness {
    let pool = melon_db::create_memory_pool().await.expect("in-memory pool");
    let storage = Arc::new(MemoryStorage::new());
    let index = DatasetIndex::new(pool.clone(), storage.clone() as Arc<dyn Storage>);
    let queue = AnnotationQueue::new(pool.clone());
    let tracker = ChangeTracker::new(pool.clone());
    let registry = Arc::new(ModelRegistry::new(pool.clone()));
    let hub = Arc::new(ProgressBroadcaster::default());
    let mut runner = JobRunner::new(
        pool.clone(),
        index.clone(),
        tracker.clone(),
        Arc::clone(&registry),
        Arc::clone(&hub),
        config,
    );
    if let Some(extractor) = extractor {
        runner = runner.with_extractor(extractor);
    }
    Harness {
        pool,
        storage,
        index,
        queue,
        tracker,
        registry,
        hub,
        runner: Arc::new(runner),
    }
}

impl Harness {
    /// Put images into storage and index them.
    pub async fn seed_images(&self, paths: &[&str]) {
        for path in paths {
            self.storage.put(path, vec![0u8; 4]).await.unwrap();
        }
        self.index.refresh().await.unwrap();
    }
}

/// Follow a job's stream to its terminal event.
pub async fn wait_for_terminal(runner: &JobRunner, job_id: JobId) -> (TerminalStatus, Option<String>) {
    let mut sub = runner.subscribe(job_id).expect("job is tracked");
    let follow = async {
        while let Some(event) = sub.next().await {
            match event {
                ProgressEvent::Terminal { status, summary } => return (status, summary),
                ProgressEvent::CatchUp {
                    state, summary, ..
                } if state.is_terminal() => {
                    let status = match state {
                        melon_core::job::JobState::Succeeded => TerminalStatus::Succeeded,
                        melon_core::job::JobState::Failed => TerminalStatus::Failed,
                        _ => TerminalStatus::Cancelled,
                    };
                    return (status, summary);
                }
                _ => {}
            }
        }
        panic!("stream ended without a terminal event");
    };
    tokio::time::timeout(Duration::from_secs(10), follow)
        .await
        .expect("job finished in time")
}

pub fn metrics(accuracy: f64, f1: f64) -> Metrics {
    Metrics {
        accuracy: Some(accuracy),
        precision: Some(f1),
        recall: Some(f1),
        f1_score: Some(f1),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Fake models
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum Behavior {
    /// Predicts `label` and trains to `metrics` immediately.
    Ok,
    /// Both operations fail.
    Fail,
    /// Prediction panics.
    Panic,
    /// Prediction never returns.
    Hang,
    /// Training waits for `gate` (or cancellation).
    Gated(Arc<Notify>),
}

pub struct FakeModel {
    pub key: String,
    pub task: ModelTask,
    pub label: String,
    pub confidence: f64,
    pub trained: Metrics,
    pub seed: Option<Metrics>,
    pub behavior: Behavior,
}

impl FakeModel {
    pub fn new(key: &str, task: ModelTask, label: &str, confidence: f64) -> Self {
        Self {
            key: key.to_string(),
            task,
            label: label.to_string(),
            confidence,
            trained: metrics(0.9, 0.8),
            seed: None,
            behavior: Behavior::Ok,
        }
    }

    pub fn behaving(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn trains_to(mut self, trained: Metrics) -> Self {
        self.trained = trained;
        self
    }

    pub fn seeded(mut self, seed: Metrics) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn into_arc(self) -> Arc<dyn Model> {
        Arc::new(self)
    }
}

#[async_trait]
impl Model for FakeModel {
    fn key(&self) -> &str {
        &self.key
    }

    fn task(&self) -> ModelTask {
        self.task
    }

    fn display_name(&self) -> &str {
        &self.key
    }

    async fn predict(&self, _image: &[u8]) -> Result<Prediction, ModelError> {
        match &self.behavior {
            Behavior::Fail => Err(ModelError::Prediction("weights missing".into())),
            Behavior::Panic => panic!("model exploded"),
            Behavior::Hang => std::future::pending().await,
            _ => Ok(Prediction {
                label: self.label.clone(),
                confidence: self.confidence,
                raw: serde_json::Value::Null,
            }),
        }
    }

    async fn train(&self, ctx: JobContext<'_>) -> Result<Metrics, ModelError> {
        ctx.progress.progress(50, "halfway");
        match &self.behavior {
            Behavior::Fail | Behavior::Panic | Behavior::Hang => {
                Err(ModelError::Training("diverged".into()))
            }
            Behavior::Ok => Ok(self.trained.clone()),
            Behavior::Gated(gate) => tokio::select! {
                _ = gate.notified() => Ok(self.trained.clone()),
                _ = ctx.cancel.cancelled() => Err(ModelError::Cancelled),
            },
        }
    }

    fn metrics(&self) -> Option<Metrics> {
        self.seed.clone()
    }
}

// ---------------------------------------------------------------------------
// Fake extractors
// ---------------------------------------------------------------------------

/// Succeeds immediately, reporting how many images it saw.
pub struct QuickExtractor;

#[async_trait]
impl FeatureExtractor for QuickExtractor {
    async fn run(&self, ctx: JobContext<'_>) -> Result<Metrics, ModelError> {
        ctx.progress.progress(100, "features written");
        let mut metrics = Metrics::default();
        metrics
            .extra
            .insert("images_processed".into(), ctx.dataset.len() as f64);
        Ok(metrics)
    }
}

/// Runs until cancelled and then stops promptly.
pub struct CooperativeExtractor;

#[async_trait]
impl FeatureExtractor for CooperativeExtractor {
    async fn run(&self, ctx: JobContext<'_>) -> Result<Metrics, ModelError> {
        ctx.progress.progress(10, "extracting");
        ctx.cancel.cancelled().await;
        ctx.progress.log("stopping on request");
        Err(ModelError::Cancelled)
    }
}

/// Never looks at the cancellation token.
pub struct StubbornExtractor;

#[async_trait]
impl FeatureExtractor for StubbornExtractor {
    async fn run(&self, _ctx: JobContext<'_>) -> Result<Metrics, ModelError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Metrics::default())
    }
}

/// Always fails.
pub struct BrokenExtractor;

#[async_trait]
impl FeatureExtractor for BrokenExtractor {
    async fn run(&self, _ctx: JobContext<'_>) -> Result<Metrics, ModelError> {
        Err(ModelError::Extraction("feature store unreachable".into()))
    }
}

/// Panics partway through.
pub struct PanickingExtractor;

#[async_trait]
impl FeatureExtractor for PanickingExtractor {
    async fn run(&self, ctx: JobContext<'_>) -> Result<Metrics, ModelError> {
        ctx.progress.progress(20, "reading features");
        panic!("feature buffer overflow");
    }
}
