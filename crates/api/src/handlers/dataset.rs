//! Handlers for the dataset index.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use melon_core::dataset::DatasetSet;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// `?set=&filename=` for image uploads.
#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub set: String,
    pub filename: String,
}

/// POST /api/v1/dataset/refresh
///
/// Re-scan storage and reconcile the image index.
pub async fn refresh(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let report = state.index.refresh().await?;
    Ok(Json(DataResponse { data: report }))
}

/// POST /api/v1/dataset/images?set=&filename=
///
/// Store the raw request body as a new image. Returns 201 with the record.
pub async fn upload_image(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    if body.is_empty() {
        return Err(AppError::BadRequest(
            "Request body must contain the image bytes".into(),
        ));
    }
    let set: DatasetSet = params.set.parse()?;
    let record = state
        .index
        .add_image(set, &params.filename, body.to_vec())
        .await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: record })))
}

/// GET /api/v1/dataset/stats
///
/// Total, annotated and unannotated image counts per partition.
pub async fn stats(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let stats = state.index.stats().await?;
    Ok(Json(DataResponse { data: stats }))
}

/// GET /api/v1/dataset/quality
///
/// Train/valid/test split and class balance checks, with recommendations.
pub async fn quality(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let report = state.index.quality().await?;
    Ok(Json(DataResponse { data: report }))
}
