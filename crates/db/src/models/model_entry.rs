use sqlx::types::Json;
use sqlx::FromRow;

use melon_core::model::{Metrics, ModelEntry};
use melon_core::types::Timestamp;

use super::decode;

/// A row from the `model_entries` table.
#[derive(Debug, Clone, FromRow)]
pub struct ModelEntryRow {
    pub model_key: String,
    pub task: String,
    pub display_name: String,
    pub metrics: Option<Json<Metrics>>,
    pub last_trained_at: Option<Timestamp>,
}

impl TryFrom<ModelEntryRow> for ModelEntry {
    type Error = sqlx::Error;

    fn try_from(row: ModelEntryRow) -> Result<Self, Self::Error> {
        Ok(ModelEntry {
            key: row.model_key,
            task: decode(&row.task)?,
            display_name: row.display_name,
            metrics: row.metrics.map(|m| m.0),
            last_trained_at: row.last_trained_at,
        })
    }
}
