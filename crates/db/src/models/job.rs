use serde::Deserialize;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use melon_core::job::Job;
use melon_core::types::Timestamp;

use super::decode;

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub kind: String,
    pub mode: String,
    pub state: String,
    pub progress_percent: i64,
    pub log_tail: Json<Vec<String>>,
    pub summary: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl TryFrom<JobRow> for Job {
    type Error = sqlx::Error;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: row.id,
            kind: decode(&row.kind)?,
            mode: decode(&row.mode)?,
            state: decode(&row.state)?,
            progress_percent: row.progress_percent.clamp(0, 100) as u8,
            log_tail: row.log_tail.0,
            summary: row.summary,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

/// Query parameters for `GET /api/v1/jobs`.
#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    /// Filter by kind (e.g. `train_detector`).
    pub kind: Option<String>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}
