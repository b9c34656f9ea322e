//! Handlers for the `/jobs` resource: trigger, observe, and cancel
//! extraction and training runs.

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use melon_core::job::{JobKind, JobMode};
use melon_core::types::JobId;
use melon_db::models::job::JobListQuery;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;
use crate::ws::job_stream::{self, StreamSource};

/// Body of `POST /api/v1/jobs`.
#[derive(Debug, Deserialize)]
pub struct TriggerJob {
    pub kind: JobKind,
    #[serde(default = "default_mode")]
    pub mode: JobMode,
}

fn default_mode() -> JobMode {
    JobMode::Incremental
}

#[derive(Debug, Serialize)]
pub struct BreakerState {
    pub kind: JobKind,
    pub consecutive_failures: u32,
}

// ---------------------------------------------------------------------------
// Trigger / cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Start a job. Returns 202 with the running job, or 409 while another job
/// of the same kind runs.
pub async fn trigger_job(
    State(state): State<AppState>,
    Json(input): Json<TriggerJob>,
) -> AppResult<impl IntoResponse> {
    let job = state.runner.trigger(input.kind, input.mode).await?;
    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: job })))
}

/// POST /api/v1/jobs/{id}/cancel
///
/// Request cancellation. Returns 202; the job turns `cancelled` once the
/// operation stops or the grace period runs out. 409 if it is not running.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.runner.cancel(job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: job })))
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    if let Some(kind) = &params.kind {
        kind.parse::<JobKind>()?;
    }
    let jobs = state.runner.list(&params).await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.runner.get(job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// GET /api/v1/jobs/{id}/stream
///
/// Upgrade to a WebSocket that carries the job's progress events. Unknown
/// jobs are rejected with 404 before the upgrade is checked.
pub async fn stream_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> AppResult<impl IntoResponse> {
    let source = match state.runner.subscribe(job_id) {
        Some(subscription) => StreamSource::Live(subscription),
        None => StreamSource::Stored(state.runner.get(job_id).await?),
    };
    let ws = ws.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let ws_manager = state.ws_manager.clone();
    Ok(ws.on_upgrade(move |socket| job_stream::serve(socket, job_id, source, ws_manager)))
}

/// GET /api/v1/jobs/last-actions
///
/// Outcome of the most recent run per action.
pub async fn last_actions(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let actions = state.tracker.last_actions().await?;
    Ok(Json(DataResponse { data: actions }))
}

/// POST /api/v1/jobs/breaker/{kind}/reset
///
/// Clear the consecutive-failure count of a job kind.
pub async fn reset_breaker(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> AppResult<impl IntoResponse> {
    let kind: JobKind = kind.parse()?;
    state.runner.reset_breaker(kind);
    Ok(Json(DataResponse {
        data: BreakerState {
            kind,
            consecutive_failures: state.runner.consecutive_failures(kind),
        },
    }))
}
