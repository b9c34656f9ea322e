use axum::routing::get;
use axum::Router;

use crate::handlers::annotations;
use crate::state::AppState;

/// Routes mounted at `/annotations`.
///
/// ```text
/// GET    /          -> get_annotation (?path=)
/// POST   /          -> submit_annotation
/// GET    /queue     -> list_queue
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(annotations::get_annotation).post(annotations::submit_annotation),
        )
        .route("/queue", get(annotations::list_queue))
}
