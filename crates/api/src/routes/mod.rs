pub mod annotations;
pub mod dataset;
pub mod health;
pub mod jobs;
pub mod models;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /annotations                                GET one (?path=), POST submit
/// /annotations/queue                          GET page of unannotated images
///
/// /dataset/refresh                            POST re-scan storage
/// /dataset/images                             POST upload (?set=&filename=)
/// /dataset/stats                              GET per-partition counts
/// /dataset/quality                            GET split and balance checks
/// /dataset/changes/current                    GET fingerprint
/// /dataset/changes/notification               GET change notice
/// /dataset/changes/acknowledge                POST (?version=)
/// /dataset/changes/history                    GET change log
///
/// /jobs                                       GET list, POST trigger
/// /jobs/last-actions                          GET last run per action
/// /jobs/breaker/{kind}/reset                  POST clear failure count
/// /jobs/{id}                                  GET one
/// /jobs/{id}/cancel                           POST cancel
/// /jobs/{id}/stream                           WebSocket progress
///
/// /models                                     GET list (?task=)
/// /models/{task}/predict                      POST run all models
/// /models/{task}/best                         GET best model
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/annotations", annotations::router())
        .nest("/dataset", dataset::router())
        .nest("/jobs", jobs::router())
        .nest("/models", models::router())
}
