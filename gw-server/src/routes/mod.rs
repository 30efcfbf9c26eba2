pub mod gateways;
pub mod info;
pub mod queries;
pub mod search;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/gateways", get(gateways::list).post(gateways::create_or_resolve))
        .route("/gateways/{id}", get(gateways::get_one))
        .route("/gateways/{id}/structures", get(gateways::structures))
        .route("/gateways/{id}/structures/{*entry_ref}", get(gateways::structures_entry))
        .route("/gateways/{id}/queries", post(queries::create))
        .route("/queries/{id}", get(queries::get_one))
        .route("/search", get(search::search))
        .route("/info", get(info::info))
        .route("/links", get(info::links))
        .route("/versions", get(info::versions))
        .with_state(state)
}
