//! JSON manifest declaring the external models and feature extractor to
//! register at startup.
//!
//! ```json
//! {
//!   "feature_extractor": { "program": "python3", "args": ["extract.py"] },
//!   "models": [
//!     {
//!       "key": "yolo_v8",
//!       "task": "detector",
//!       "display_name": "YOLOv8",
//!       "predict": { "program": "python3", "args": ["yolo.py", "predict"] },
//!       "train": { "program": "python3", "args": ["yolo.py", "train"] },
//!       "metrics": { "f1_score": 0.81 }
//!     }
//!   ]
//! }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use melon_core::error::CoreError;
use melon_core::model::{FeatureExtractor, Metrics, Model, ModelTask};

use crate::external::{CommandFeatureExtractor, CommandModel, CommandSpec};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelManifest {
    #[serde(default)]
    pub feature_extractor: Option<CommandSpec>,
    #[serde(default)]
    pub models: Vec<ManifestModel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestModel {
    pub key: String,
    pub task: ModelTask,
    pub display_name: String,
    pub predict: CommandSpec,
    #[serde(default)]
    pub train: Option<CommandSpec>,
    #[serde(default)]
    pub metrics: Option<Metrics>,
    #[serde(default)]
    pub predict_timeout_secs: Option<u64>,
}

impl ModelManifest {
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let manifest: Self = serde_json::from_str(json)
            .map_err(|e| CoreError::Validation(format!("Invalid model manifest: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub async fn load(path: &Path) -> Result<Self, CoreError> {
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            CoreError::Validation(format!(
                "Cannot read model manifest {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&json)
    }

    fn validate(&self) -> Result<(), CoreError> {
        let mut seen = std::collections::HashSet::new();
        for model in &self.models {
            if model.key.trim().is_empty() {
                return Err(CoreError::Validation("Model key must not be empty".into()));
            }
            if !seen.insert(model.key.as_str()) {
                return Err(CoreError::Validation(format!(
                    "Duplicate model key '{}' in manifest",
                    model.key
                )));
            }
        }
        Ok(())
    }

    pub fn models(&self) -> Vec<Arc<dyn Model>> {
        self.models
            .iter()
            .map(|m| {
                let mut model = CommandModel::new(
                    m.key.clone(),
                    m.task,
                    m.display_name.clone(),
                    m.predict.clone(),
                )
                .with_metrics(m.metrics.clone());
                if let Some(train) = &m.train {
                    model = model.with_train(train.clone());
                }
                if let Some(secs) = m.predict_timeout_secs {
                    model = model.with_predict_timeout(Duration::from_secs(secs));
                }
                Arc::new(model) as Arc<dyn Model>
            })
            .collect()
    }

    pub fn feature_extractor(&self) -> Option<Arc<dyn FeatureExtractor>> {
        self.feature_extractor
            .clone()
            .map(|spec| Arc::new(CommandFeatureExtractor::new(spec)) as Arc<dyn FeatureExtractor>)
    }
}
