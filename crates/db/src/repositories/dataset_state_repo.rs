//! Repository for the single-row `dataset_state` table.
//!
//! Version bumps and acknowledgements are single statements, so concurrent
//! writers serialize on SQLite's write lock and no increment is lost.

use sqlx::{Executor, Sqlite};

use melon_core::dataset_change::{AckState, ChangeType, DatasetFingerprint};
use melon_core::types::Timestamp;

use crate::models::dataset_state::DatasetStateRow;

/// Column list for `dataset_state` queries.
const COLUMNS: &str = "\
    version, last_change_type, last_change_identifier, items_affected, \
    changed_at, seen_version";

/// Provides the current fingerprint and acknowledgement state.
pub struct DatasetStateRepo;

impl DatasetStateRepo {
    pub async fn get<'e, E>(executor: E) -> Result<DatasetStateRow, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let query = format!("SELECT {COLUMNS} FROM dataset_state WHERE id = 1");
        sqlx::query_as::<_, DatasetStateRow>(&query)
            .fetch_one(executor)
            .await
    }

    /// Atomically advance the version and replace the fingerprint.
    pub async fn bump<'e, E>(
        executor: E,
        change_type: ChangeType,
        identifier: &str,
        items_affected: i64,
        changed_at: Timestamp,
    ) -> Result<DatasetFingerprint, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let query = format!(
            "UPDATE dataset_state SET \
                 version = version + 1, \
                 last_change_type = ?1, \
                 last_change_identifier = ?2, \
                 items_affected = ?3, \
                 changed_at = ?4 \
             WHERE id = 1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DatasetStateRow>(&query)
            .bind(change_type.as_str())
            .bind(identifier)
            .bind(items_affected)
            .bind(changed_at)
            .fetch_one(executor)
            .await?
            .fingerprint()
    }

    /// Mark the current version as seen. Never moves `seen_version` backwards.
    pub async fn acknowledge<'e, E>(executor: E) -> Result<AckState, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let seen_version = sqlx::query_scalar::<_, i64>(
            "UPDATE dataset_state SET seen_version = MAX(seen_version, version) \
             WHERE id = 1 \
             RETURNING seen_version",
        )
        .fetch_one(executor)
        .await?;
        Ok(AckState { seen_version })
    }

    /// Acknowledge up to `version` only, the fingerprint the operator was
    /// actually shown. Clamped to the current version; never moves backwards.
    pub async fn acknowledge_up_to<'e, E>(
        executor: E,
        version: i64,
    ) -> Result<AckState, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let seen_version = sqlx::query_scalar::<_, i64>(
            "UPDATE dataset_state SET seen_version = MAX(seen_version, MIN(?1, version)) \
             WHERE id = 1 \
             RETURNING seen_version",
        )
        .bind(version)
        .fetch_one(executor)
        .await?;
        Ok(AckState { seen_version })
    }
}
