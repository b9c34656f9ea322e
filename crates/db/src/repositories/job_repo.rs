//! Repository for the `jobs` table.
//!
//! The in-memory runner is the source of truth while a job runs; rows are
//! written when a job starts and again when it reaches a terminal state.

use sqlx::types::Json;
use sqlx::{Executor, Sqlite};

use melon_core::job::{Job, JobState};
use melon_core::types::{JobId, Timestamp};

use crate::models::job::{JobListQuery, JobRow};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, kind, mode, state, progress_percent, log_tail, summary, \
    created_at, started_at, finished_at";

/// Maximum page size for job listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
const DEFAULT_LIMIT: i64 = 50;

/// Summary written to jobs a previous process left running.
pub const INTERRUPTED_SUMMARY: &str = "Interrupted by server restart";

/// Provides persistence for job history.
pub struct JobRepo;

impl JobRepo {
    pub async fn insert<'e, E>(executor: E, job: &Job) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            "INSERT INTO jobs \
                 (id, kind, mode, state, progress_percent, log_tail, summary, \
                  created_at, started_at, finished_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(job.id)
        .bind(job.kind.as_str())
        .bind(job.mode.as_str())
        .bind(job.state.as_str())
        .bind(i64::from(job.progress_percent))
        .bind(Json(&job.log_tail))
        .bind(&job.summary)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Persist a job's final state, progress, log tail, and summary.
    pub async fn finish<'e, E>(executor: E, job: &Job) -> Result<bool, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "UPDATE jobs SET state = ?2, progress_percent = ?3, log_tail = ?4, \
                 summary = ?5, finished_at = ?6 \
             WHERE id = ?1",
        )
        .bind(job.id)
        .bind(job.state.as_str())
        .bind(i64::from(job.progress_percent))
        .bind(Json(&job.log_tail))
        .bind(&job.summary)
        .bind(job.finished_at)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id<'e, E>(executor: E, id: JobId) -> Result<Option<Job>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = ?1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    /// Job history, newest first, optionally filtered by kind.
    pub async fn list<'e, E>(executor: E, params: &JobListQuery) -> Result<Vec<Job>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = params.offset.unwrap_or(0).max(0);
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE (?1 IS NULL OR kind = ?1) \
             ORDER BY created_at DESC, id DESC \
             LIMIT ?2 OFFSET ?3"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(params.kind.as_deref())
            .bind(limit)
            .bind(offset)
            .fetch_all(executor)
            .await?
            .into_iter()
            .map(Job::try_from)
            .collect()
    }

    /// Fail every job still marked pending or running. Called once at
    /// startup, before any new job can be triggered.
    pub async fn fail_interrupted<'e, E>(executor: E, now: Timestamp) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "UPDATE jobs SET state = ?1, summary = ?2, finished_at = ?3 \
             WHERE state IN (?4, ?5)",
        )
        .bind(JobState::Failed.as_str())
        .bind(INTERRUPTED_SUMMARY)
        .bind(now)
        .bind(JobState::Pending.as_str())
        .bind(JobState::Running.as_str())
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete terminal jobs that finished before `cutoff`.
    pub async fn delete_finished_before<'e, E>(
        executor: E,
        cutoff: Timestamp,
    ) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE finished_at IS NOT NULL AND finished_at < ?1 \
             AND state IN (?2, ?3, ?4)",
        )
        .bind(cutoff)
        .bind(JobState::Succeeded.as_str())
        .bind(JobState::Failed.as_str())
        .bind(JobState::Cancelled.as_str())
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }
}
