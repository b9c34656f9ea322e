//! Dataset fingerprint versioning, the one-shot change notice, and the
//! per-action "last run" record.

use chrono::Utc;
use sqlx::SqliteConnection;

use melon_core::dataset_change::{
    normalize_identifier, AckState, ChangeNotice, DatasetFingerprint,
};
use melon_core::job::LastAction;
use melon_db::models::change_log::{ChangeLogEntry, NewChange};
use melon_db::repositories::{ChangeLogRepo, DatasetStateRepo, LastActionRepo};
use melon_db::DbPool;

use crate::error::PipelineResult;

#[derive(Clone)]
pub struct ChangeTracker {
    pool: DbPool,
}

impl ChangeTracker {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Record a change in its own transaction.
    pub async fn record(&self, change: NewChange) -> PipelineResult<DatasetFingerprint> {
        let mut tx = self.pool.begin().await?;
        let fingerprint = Self::record_in(&mut *tx, change).await?;
        tx.commit().await?;
        Ok(fingerprint)
    }

    /// Record a change on the caller's connection, typically inside the
    /// transaction that performed the data write.
    pub async fn record_in(
        conn: &mut SqliteConnection,
        mut change: NewChange,
    ) -> PipelineResult<DatasetFingerprint> {
        change.identifier = normalize_identifier(&change.identifier);
        let now = Utc::now();
        let fingerprint = DatasetStateRepo::bump(
            &mut *conn,
            change.change_type,
            &change.identifier,
            change.items_affected,
            now,
        )
        .await?;
        ChangeLogRepo::append(conn, fingerprint.version, &change, now).await?;

        tracing::debug!(
            version = fingerprint.version,
            change_type = %change.change_type,
            identifier = %change.identifier,
            "Dataset change recorded",
        );
        Ok(fingerprint)
    }

    pub async fn current(&self) -> PipelineResult<DatasetFingerprint> {
        Ok(DatasetStateRepo::get(&self.pool).await?.fingerprint()?)
    }

    /// Whether a notice is due, with a display summary of the latest change.
    pub async fn notification(&self) -> PipelineResult<ChangeNotice> {
        let row = DatasetStateRepo::get(&self.pool).await?;
        Ok(ChangeNotice::build(row.fingerprint()?, row.ack(), Utc::now()))
    }

    /// Mark changes as seen, either everything or only up to `version`.
    pub async fn acknowledge(&self, version: Option<i64>) -> PipelineResult<AckState> {
        let ack = match version {
            Some(v) => DatasetStateRepo::acknowledge_up_to(&self.pool, v).await?,
            None => DatasetStateRepo::acknowledge(&self.pool).await?,
        };
        tracing::info!(seen_version = ack.seen_version, "Dataset changes acknowledged");
        Ok(ack)
    }

    pub async fn history(&self, limit: i64) -> PipelineResult<Vec<ChangeLogEntry>> {
        Ok(ChangeLogRepo::list_recent(&self.pool, limit).await?)
    }

    pub async fn record_last_action(&self, action: &LastAction) -> PipelineResult<()> {
        LastActionRepo::upsert(&self.pool, action).await?;
        Ok(())
    }

    pub async fn last_actions(&self) -> PipelineResult<Vec<LastAction>> {
        Ok(LastActionRepo::list(&self.pool).await?)
    }
}
