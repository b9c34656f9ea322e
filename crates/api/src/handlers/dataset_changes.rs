//! Handlers for the dataset change notice.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::error::AppResult;
use crate::query::LimitParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// Most change-log entries returned by one history request.
const MAX_HISTORY: i64 = 50;

/// `?version=` for acknowledgements. Omitted means "everything so far".
#[derive(Debug, Deserialize)]
pub struct AcknowledgeParams {
    pub version: Option<i64>,
}

/// GET /api/v1/dataset/changes/current
pub async fn current(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let fingerprint = state.tracker.current().await?;
    Ok(Json(DataResponse { data: fingerprint }))
}

/// GET /api/v1/dataset/changes/notification
///
/// Whether a change notice is due, with a display summary of the latest
/// change.
pub async fn notification(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let notice = state.tracker.notification().await?;
    Ok(Json(DataResponse { data: notice }))
}

/// POST /api/v1/dataset/changes/acknowledge
pub async fn acknowledge(
    State(state): State<AppState>,
    Query(params): Query<AcknowledgeParams>,
) -> AppResult<impl IntoResponse> {
    let ack = state.tracker.acknowledge(params.version).await?;
    Ok(Json(DataResponse { data: ack }))
}

/// GET /api/v1/dataset/changes/history?limit=
pub async fn history(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> AppResult<impl IntoResponse> {
    let limit = params.limit.unwrap_or(MAX_HISTORY).clamp(1, MAX_HISTORY);
    let entries = state.tracker.history(limit).await?;
    Ok(Json(DataResponse { data: entries }))
}
