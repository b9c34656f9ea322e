use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{dataset, dataset_changes};
use crate::state::AppState;

/// Largest accepted image upload (32 MiB).
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Routes mounted at `/dataset`.
///
/// ```text
/// POST   /refresh                  -> refresh
/// POST   /images                   -> upload_image
/// GET    /stats                    -> stats
/// GET    /quality                  -> quality
/// GET    /changes/current          -> current
/// GET    /changes/notification     -> notification
/// POST   /changes/acknowledge      -> acknowledge
/// GET    /changes/history          -> history
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/refresh", post(dataset::refresh))
        .route(
            "/images",
            post(dataset::upload_image).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/stats", get(dataset::stats))
        .route("/quality", get(dataset::quality))
        .route("/changes/current", get(dataset_changes::current))
        .route("/changes/notification", get(dataset_changes::notification))
        .route("/changes/acknowledge", post(dataset_changes::acknowledge))
        .route("/changes/history", get(dataset_changes::history))
}
