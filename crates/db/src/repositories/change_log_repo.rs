//! Repository for the `dataset_change_log` table.

use sqlx::types::Json;
use sqlx::{Executor, Sqlite, SqliteConnection};

use melon_core::dataset_change::CHANGE_LOG_CAPACITY;
use melon_core::types::Timestamp;

use crate::models::change_log::{ChangeLogEntry, NewChange};

/// Column list for `dataset_change_log` queries.
const COLUMNS: &str = "id, version, change_type, identifier, items_affected, details, changed_at";

/// Provides the rolling history of dataset changes.
pub struct ChangeLogRepo;

impl ChangeLogRepo {
    /// Append an entry and trim the log to [`CHANGE_LOG_CAPACITY`] entries.
    pub async fn append(
        conn: &mut SqliteConnection,
        version: i64,
        change: &NewChange,
        changed_at: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO dataset_change_log \
                 (version, change_type, identifier, items_affected, details, changed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(version)
        .bind(change.change_type.as_str())
        .bind(&change.identifier)
        .bind(change.items_affected)
        .bind(Json(&change.details))
        .bind(changed_at)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            "DELETE FROM dataset_change_log WHERE id NOT IN ( \
                 SELECT id FROM dataset_change_log ORDER BY id DESC LIMIT ?1 \
             )",
        )
        .bind(CHANGE_LOG_CAPACITY)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Most recent entries first.
    pub async fn list_recent<'e, E>(executor: E, limit: i64) -> Result<Vec<ChangeLogEntry>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let limit = limit.clamp(1, CHANGE_LOG_CAPACITY);
        let query = format!("SELECT {COLUMNS} FROM dataset_change_log ORDER BY id DESC LIMIT ?1");
        sqlx::query_as::<_, ChangeLogEntry>(&query)
            .bind(limit)
            .fetch_all(executor)
            .await
    }
}
