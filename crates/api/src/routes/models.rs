use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::handlers::models;
use crate::state::AppState;

/// Largest image accepted for prediction (32 MiB).
const MAX_IMAGE_BYTES: usize = 32 * 1024 * 1024;

/// Routes mounted at `/models`.
///
/// ```text
/// GET    /                  -> list_models (?task=)
/// POST   /{task}/predict    -> predict
/// GET    /{task}/best       -> best_model
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(models::list_models))
        .route(
            "/{task}/predict",
            post(models::predict).layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES)),
        )
        .route("/{task}/best", get(models::best_model))
}
