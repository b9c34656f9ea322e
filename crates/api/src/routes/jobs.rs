use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                        -> list_jobs
/// POST   /                        -> trigger_job
/// GET    /last-actions            -> last_actions
/// POST   /breaker/{kind}/reset    -> reset_breaker
/// GET    /{id}                    -> get_job
/// POST   /{id}/cancel             -> cancel_job
/// GET    /{id}/stream             -> stream_job (WebSocket)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::trigger_job))
        .route("/last-actions", get(jobs::last_actions))
        .route("/breaker/{kind}/reset", post(jobs::reset_breaker))
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/cancel", post(jobs::cancel_job))
        .route("/{id}/stream", get(jobs::stream_job))
}
