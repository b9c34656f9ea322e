//! Handlers for registered models: listing, fan-out prediction, and the
//! best model per task.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;

use melon_core::model::ModelTask;

use crate::error::{AppError, AppResult};
use crate::query::TaskParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/models?task=
///
/// Registry entries with their latest metrics. Both tasks when `task` is
/// omitted.
pub async fn list_models(
    State(state): State<AppState>,
    Query(params): Query<TaskParams>,
) -> AppResult<impl IntoResponse> {
    let tasks = match params.task.as_deref() {
        Some(task) => vec![task.parse::<ModelTask>()?],
        None => vec![ModelTask::Detector, ModelTask::Classifier],
    };
    let mut entries = Vec::new();
    for task in tasks {
        entries.extend(state.registry.list_models(task).await?);
    }
    Ok(Json(DataResponse { data: entries }))
}

/// POST /api/v1/models/{task}/predict
///
/// Run every model of `task` on the image in the request body and return
/// the per-model results with their majority verdict.
pub async fn predict(
    State(state): State<AppState>,
    Path(task): Path<String>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let task: ModelTask = task.parse()?;
    if body.is_empty() {
        return Err(AppError::BadRequest(
            "Request body must contain the image bytes".into(),
        ));
    }
    let report = state
        .registry
        .predict(task, Arc::from(body.to_vec().into_boxed_slice()))
        .await;
    tracing::info!(
        task = %task,
        models = report.results.len(),
        agreement = report.vote.agreement_count,
        "Prediction completed",
    );
    Ok(Json(DataResponse { data: report }))
}

/// GET /api/v1/models/{task}/best
///
/// The highest-ranked model by the task's primary metric, or `null` when no
/// model has been evaluated.
pub async fn best_model(
    State(state): State<AppState>,
    Path(task): Path<String>,
) -> AppResult<impl IntoResponse> {
    let task: ModelTask = task.parse()?;
    let best = state.registry.best_model(task).await?;
    Ok(Json(DataResponse { data: best }))
}
