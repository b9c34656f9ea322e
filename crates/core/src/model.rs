//! Model collaborator contracts and the records the registry keeps for them.
//!
//! Detectors decide `melon` / `non_melon`; classifiers decide `ripe` /
//! `unripe`. Both are opaque [`Model`] implementations keyed by string.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::annotation::Annotation;
use crate::dataset::ImageRecord;
use crate::error::CoreError;
use crate::job::JobMode;
use crate::progress::ProgressSink;
use crate::storage::{Storage, StorageError};
use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// ModelTask
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTask {
    Detector,
    Classifier,
}

impl ModelTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detector => "detector",
            Self::Classifier => "classifier",
        }
    }

    /// Label counted as the positive class when scoring.
    pub fn positive_label(&self) -> &'static str {
        match self {
            Self::Detector => "melon",
            Self::Classifier => "ripe",
        }
    }
}

impl fmt::Display for ModelTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelTask {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "detector" => Ok(Self::Detector),
            "classifier" => Ok(Self::Classifier),
            _ => Err(CoreError::Validation(format!(
                "Invalid model task '{s}'. Must be one of: detector, classifier"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Evaluation results. Training produces the four headline scores; feature
/// extraction reports counters in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recall: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub f1_score: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, f64>,
}

impl Metrics {
    pub fn value(&self, metric: PrimaryMetric) -> Option<f64> {
        let v = match metric {
            PrimaryMetric::Accuracy => self.accuracy,
            PrimaryMetric::Precision => self.precision,
            PrimaryMetric::Recall => self.recall,
            PrimaryMetric::F1 => self.f1_score,
            PrimaryMetric::Weighted => {
                let f1 = self.f1_score?;
                let acc = self.accuracy?;
                let precision = self.precision.unwrap_or(0.0);
                let recall = self.recall.unwrap_or(0.0);
                Some(0.7 * f1 + 0.2 * acc + 0.05 * precision + 0.05 * recall)
            }
        };
        v.filter(|x| x.is_finite())
    }
}

/// Metric a task's models are ranked by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryMetric {
    Accuracy,
    Precision,
    Recall,
    F1,
    /// `0.7 * f1 + 0.2 * accuracy + 0.05 * precision + 0.05 * recall`.
    Weighted,
}

impl PrimaryMetric {
    pub fn default_for(task: ModelTask) -> Self {
        match task {
            ModelTask::Detector => Self::F1,
            ModelTask::Classifier => Self::Accuracy,
        }
    }
}

impl FromStr for PrimaryMetric {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accuracy" => Ok(Self::Accuracy),
            "precision" => Ok(Self::Precision),
            "recall" => Ok(Self::Recall),
            "f1" | "f1_score" => Ok(Self::F1),
            "weighted" => Ok(Self::Weighted),
            _ => Err(CoreError::Validation(format!(
                "Invalid metric '{s}'. Must be one of: accuracy, precision, recall, f1, weighted"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub key: String,
    pub task: ModelTask,
    pub display_name: String,
    pub metrics: Option<Metrics>,
    pub last_trained_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f64,
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// Outcome of one model in a fan-out run. Exactly one of `prediction` and
/// `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerModelResult {
    pub model_key: String,
    pub display_name: String,
    pub prediction: Option<Prediction>,
    pub error: Option<String>,
}

impl PerModelResult {
    pub fn ok(model_key: impl Into<String>, display_name: impl Into<String>, p: Prediction) -> Self {
        Self {
            model_key: model_key.into(),
            display_name: display_name.into(),
            prediction: Some(p),
            error: None,
        }
    }

    pub fn failed(
        model_key: impl Into<String>,
        display_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            model_key: model_key.into(),
            display_name: display_name.into(),
            prediction: None,
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborator contracts
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("prediction failed: {0}")]
    Prediction(String),

    #[error("training failed: {0}")]
    Training(String),

    #[error("feature extraction failed: {0}")]
    Extraction(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("cancelled")]
    Cancelled,
}

/// Annotated images an operation trains or extracts from.
pub struct DatasetHandle {
    pub images: Vec<(ImageRecord, Annotation)>,
    pub storage: Arc<dyn Storage>,
}

impl DatasetHandle {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Everything a running operation needs. `cancel` must be polled: once it
/// fires the operation should stop and return [`ModelError::Cancelled`].
#[derive(Clone, Copy)]
pub struct JobContext<'a> {
    pub job_id: JobId,
    pub mode: JobMode,
    pub dataset: &'a DatasetHandle,
    pub progress: &'a dyn ProgressSink,
    pub cancel: &'a CancellationToken,
}

#[async_trait]
pub trait Model: Send + Sync {
    fn key(&self) -> &str;

    fn task(&self) -> ModelTask;

    fn display_name(&self) -> &str;

    async fn predict(&self, image: &[u8]) -> Result<Prediction, ModelError>;

    async fn train(&self, ctx: JobContext<'_>) -> Result<Metrics, ModelError>;

    /// Pre-evaluated metrics shipped with the model, used to seed the
    /// registry entry on first registration.
    fn metrics(&self) -> Option<Metrics> {
        None
    }
}

#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    async fn run(&self, ctx: JobContext<'_>) -> Result<Metrics, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(acc: f64, p: f64, r: f64, f1: f64) -> Metrics {
        Metrics {
            accuracy: Some(acc),
            precision: Some(p),
            recall: Some(r),
            f1_score: Some(f1),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn weighted_score() {
        let m = metrics(0.8, 0.6, 0.4, 0.5);
        let w = m.value(PrimaryMetric::Weighted).unwrap();
        assert!((w - (0.35 + 0.16 + 0.03 + 0.02)).abs() < 1e-12);
    }

    #[test]
    fn missing_or_nan_metric_is_none() {
        let mut m = Metrics::default();
        assert_eq!(m.value(PrimaryMetric::F1), None);
        m.accuracy = Some(f64::NAN);
        assert_eq!(m.value(PrimaryMetric::Accuracy), None);
    }

    #[test]
    fn default_primary_metric_per_task() {
        assert_eq!(PrimaryMetric::default_for(ModelTask::Detector), PrimaryMetric::F1);
        assert_eq!(
            PrimaryMetric::default_for(ModelTask::Classifier),
            PrimaryMetric::Accuracy
        );
    }

    #[test]
    fn metrics_serialize_compactly() {
        let m = Metrics {
            accuracy: Some(0.9),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&m).unwrap(), serde_json::json!({"accuracy": 0.9}));
    }
}
