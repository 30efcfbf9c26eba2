//! A second, separate router serving `/health` and `/ready`, following
//! `shared::admin_service::AdminService` and `ingest-router::run`'s pattern
//! of binding a second listener for operational endpoints rather than
//! mixing them into the public API surface.

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

pub fn router() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
}

async fn health() -> &'static str {
    "ok\n"
}

/// Always ready: the in-memory store and upstream client pool have no
/// warm-up phase to wait on. Kept as its own endpoint, distinct from
/// `/health`, so a future readiness dependency (e.g. a real store backend)
/// has somewhere to report from without changing the route shape.
async fn ready() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok\n")
}
