use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;

use melon_core::dataset_change::ChangeType;
use melon_core::types::Timestamp;

/// A row from the `dataset_change_log` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ChangeLogEntry {
    pub id: i64,
    pub version: i64,
    pub change_type: String,
    pub identifier: String,
    pub items_affected: i64,
    pub details: Json<serde_json::Value>,
    pub changed_at: Timestamp,
}

/// A change about to be recorded.
#[derive(Debug, Clone)]
pub struct NewChange {
    pub change_type: ChangeType,
    pub identifier: String,
    pub items_affected: i64,
    pub details: serde_json::Value,
}

impl NewChange {
    pub fn new(change_type: ChangeType, identifier: impl Into<String>, items_affected: i64) -> Self {
        Self {
            change_type,
            identifier: identifier.into(),
            items_affected,
            details: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}
