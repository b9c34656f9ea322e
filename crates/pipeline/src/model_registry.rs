//! Registered models per task, fan-out prediction, and metric-based ranking.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use melon_core::aggregation::{majority_vote, rank_models, MajorityVote};
use melon_core::model::{
    Metrics, Model, ModelEntry, ModelError, ModelTask, PerModelResult, PrimaryMetric,
};
use melon_db::repositories::ModelEntryRepo;
use melon_db::DbPool;

use crate::error::PipelineResult;

/// Longest a single model may take inside [`ModelRegistry::run_all`].
pub const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(20);

/// Per-model results of one input together with their majority verdict.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionReport {
    pub task: ModelTask,
    pub results: Vec<PerModelResult>,
    pub vote: MajorityVote,
}

/// A ranked entry and the score it was ranked by.
#[derive(Debug, Clone, Serialize)]
pub struct RankedModel {
    #[serde(flatten)]
    pub entry: ModelEntry,
    pub score: f64,
}

pub struct ModelRegistry {
    pool: DbPool,
    models: RwLock<BTreeMap<String, Arc<dyn Model>>>,
    detector_metric: PrimaryMetric,
    classifier_metric: PrimaryMetric,
    model_timeout: Duration,
}

impl ModelRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            models: RwLock::new(BTreeMap::new()),
            detector_metric: PrimaryMetric::default_for(ModelTask::Detector),
            classifier_metric: PrimaryMetric::default_for(ModelTask::Classifier),
            model_timeout: DEFAULT_MODEL_TIMEOUT,
        }
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub fn with_primary_metrics(mut self, detector: PrimaryMetric, classifier: PrimaryMetric) -> Self {
        self.detector_metric = detector;
        self.classifier_metric = classifier;
        self
    }

    pub fn primary_metric(&self, task: ModelTask) -> PrimaryMetric {
        match task {
            ModelTask::Detector => self.detector_metric,
            ModelTask::Classifier => self.classifier_metric,
        }
    }

    /// Add a model, or replace the one registered under the same key.
    ///
    /// The persisted entry keeps any metrics from earlier training runs; the
    /// model's own metrics only seed an entry that has none.
    pub async fn register(&self, model: Arc<dyn Model>) -> PipelineResult<ModelEntry> {
        let seed = model.metrics();
        let entry = ModelEntryRepo::register(
            &self.pool,
            model.key(),
            model.task(),
            model.display_name(),
            seed.as_ref(),
            Utc::now(),
        )
        .await?;

        self.models
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model.key().to_string(), model);

        tracing::info!(model_key = %entry.key, task = %entry.task, "Model registered");
        Ok(entry)
    }

    /// Models of `task` in key order.
    pub fn models_for(&self, task: ModelTask) -> Vec<Arc<dyn Model>> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|m| m.task() == task)
            .cloned()
            .collect()
    }

    pub async fn list_models(&self, task: ModelTask) -> PipelineResult<Vec<ModelEntry>> {
        Ok(ModelEntryRepo::list_by_task(&self.pool, task).await?)
    }

    /// Run every model of `task` on `image`, each on its own task.
    ///
    /// A model that errors, panics or outlives the model timeout yields an
    /// error entry; it never affects the others. Results are in key order.
    pub async fn run_all(&self, task: ModelTask, image: Arc<[u8]>) -> Vec<PerModelResult> {
        let models = self.models_for(task);
        let handles: Vec<_> = models
            .iter()
            .map(|model| {
                let model = Arc::clone(model);
                let image = Arc::clone(&image);
                let limit = self.model_timeout;
                tokio::spawn(async move {
                    tokio::time::timeout(limit, model.predict(&image))
                        .await
                        .unwrap_or_else(|_| {
                            Err(ModelError::Prediction(format!(
                                "no answer within {}ms",
                                limit.as_millis()
                            )))
                        })
                })
            })
            .collect();

        let outcomes = futures::future::join_all(handles).await;
        models
            .iter()
            .zip(outcomes)
            .map(|(model, outcome)| match outcome {
                Ok(Ok(prediction)) => {
                    PerModelResult::ok(model.key(), model.display_name(), prediction)
                }
                Ok(Err(e)) => {
                    tracing::warn!(model_key = %model.key(), error = %e, "Model prediction failed");
                    PerModelResult::failed(model.key(), model.display_name(), e.to_string())
                }
                Err(join_err) => {
                    tracing::error!(model_key = %model.key(), error = %join_err, "Model task aborted");
                    let message = if join_err.is_panic() {
                        "model panicked during prediction"
                    } else {
                        "model task was cancelled"
                    };
                    PerModelResult::failed(model.key(), model.display_name(), message)
                }
            })
            .collect()
    }

    /// [`run_all`](Self::run_all) plus the majority verdict.
    pub async fn predict(&self, task: ModelTask, image: Arc<[u8]>) -> PredictionReport {
        let results = self.run_all(task, image).await;
        let vote = majority_vote(&results);
        PredictionReport {
            task,
            results,
            vote,
        }
    }

    /// Evaluated entries of `task`, best first by the task's primary metric.
    pub async fn ranking(&self, task: ModelTask) -> PipelineResult<Vec<RankedModel>> {
        let entries = self.list_models(task).await?;
        Ok(rank_models(&entries, self.primary_metric(task))
            .into_iter()
            .map(|(entry, score)| RankedModel { entry, score })
            .collect())
    }

    /// `None` when no model of `task` has usable metrics.
    pub async fn best_model(&self, task: ModelTask) -> PipelineResult<Option<RankedModel>> {
        Ok(self.ranking(task).await?.into_iter().next())
    }

    /// Store the metrics of a successful training run.
    pub async fn record_training(
        &self,
        key: &str,
        metrics: &Metrics,
    ) -> PipelineResult<Option<ModelEntry>> {
        Ok(ModelEntryRepo::record_training(&self.pool, key, metrics, Utc::now()).await?)
    }
}
