//! Handlers for the annotation queue.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use melon_core::annotation::Annotation;

use crate::error::AppResult;
use crate::query::{ImagePathParams, QueueParams};
use crate::response::DataResponse;
use crate::state::AppState;

/// Body of `POST /api/v1/annotations`.
#[derive(Debug, Deserialize)]
pub struct SubmitAnnotation {
    pub image_path: String,
    #[serde(flatten)]
    pub annotation: Annotation,
}

/// GET /api/v1/annotations/queue
///
/// One page of unannotated images, sorted by path.
pub async fn list_queue(
    State(state): State<AppState>,
    Query(params): Query<QueueParams>,
) -> AppResult<impl IntoResponse> {
    let page = state
        .queue
        .list_page(params.page_size(), params.page())
        .await?;
    Ok(Json(DataResponse { data: page }))
}

/// POST /api/v1/annotations
///
/// Create or replace the annotation of one image. Returns the stored
/// annotation and the next image still waiting in the queue.
pub async fn submit_annotation(
    State(state): State<AppState>,
    Json(input): Json<SubmitAnnotation>,
) -> AppResult<impl IntoResponse> {
    let outcome = state
        .queue
        .submit(&input.image_path, input.annotation)
        .await?;
    Ok(Json(DataResponse { data: outcome }))
}

/// GET /api/v1/annotations?path=
pub async fn get_annotation(
    State(state): State<AppState>,
    Query(params): Query<ImagePathParams>,
) -> AppResult<impl IntoResponse> {
    let stored = state.queue.get(&params.path).await?;
    Ok(Json(DataResponse { data: stored }))
}
