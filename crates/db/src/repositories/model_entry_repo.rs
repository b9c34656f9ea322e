//! Repository for the `model_entries` table.

use sqlx::types::Json;
use sqlx::{Executor, Sqlite};

use melon_core::model::{Metrics, ModelEntry, ModelTask};
use melon_core::types::Timestamp;

use crate::models::model_entry::ModelEntryRow;

/// Column list for `model_entries` queries.
const COLUMNS: &str = "model_key, task, display_name, metrics, last_trained_at";

/// Provides persistence for registered models and their latest metrics.
pub struct ModelEntryRepo;

impl ModelEntryRepo {
    /// Create or refresh the entry for a registered model.
    ///
    /// Existing metrics are kept; `seed_metrics` only fills an entry that has
    /// never been evaluated.
    pub async fn register<'e, E>(
        executor: E,
        key: &str,
        task: ModelTask,
        display_name: &str,
        seed_metrics: Option<&Metrics>,
        now: Timestamp,
    ) -> Result<ModelEntry, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let query = format!(
            "INSERT INTO model_entries (model_key, task, display_name, metrics, registered_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT (model_key) DO UPDATE SET \
                 task = excluded.task, \
                 display_name = excluded.display_name, \
                 metrics = COALESCE(model_entries.metrics, excluded.metrics) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, ModelEntryRow>(&query)
            .bind(key)
            .bind(task.as_str())
            .bind(display_name)
            .bind(seed_metrics.map(Json))
            .bind(now)
            .fetch_one(executor)
            .await?;
        ModelEntry::try_from(row)
    }

    pub async fn find<'e, E>(executor: E, key: &str) -> Result<Option<ModelEntry>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let query = format!("SELECT {COLUMNS} FROM model_entries WHERE model_key = ?1");
        sqlx::query_as::<_, ModelEntryRow>(&query)
            .bind(key)
            .fetch_optional(executor)
            .await?
            .map(ModelEntry::try_from)
            .transpose()
    }

    /// All entries for a task, ordered by key.
    pub async fn list_by_task<'e, E>(
        executor: E,
        task: ModelTask,
    ) -> Result<Vec<ModelEntry>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let query = format!("SELECT {COLUMNS} FROM model_entries WHERE task = ?1 ORDER BY model_key");
        sqlx::query_as::<_, ModelEntryRow>(&query)
            .bind(task.as_str())
            .fetch_all(executor)
            .await?
            .into_iter()
            .map(ModelEntry::try_from)
            .collect()
    }

    /// Store the metrics of a successful training run.
    pub async fn record_training<'e, E>(
        executor: E,
        key: &str,
        metrics: &Metrics,
        trained_at: Timestamp,
    ) -> Result<Option<ModelEntry>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let query = format!(
            "UPDATE model_entries SET metrics = ?2, last_trained_at = ?3 \
             WHERE model_key = ?1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ModelEntryRow>(&query)
            .bind(key)
            .bind(Json(metrics))
            .bind(trained_at)
            .fetch_optional(executor)
            .await?
            .map(ModelEntry::try_from)
            .transpose()
    }
}
