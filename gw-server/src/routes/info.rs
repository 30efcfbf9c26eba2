//! Static OPTIMADE metadata endpoints: `/info`, `/links`, `/versions`.
//! Unlike the federated routes these never touch an upstream — they
//! describe the gateway itself.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn info(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "data": {
            "type": "info",
            "id": "/",
            "attributes": {
                "api_version": "1.1.0",
                "available_api_versions": [
                    {"url": format!("{}v1", state.base_url), "version": "1.1.0"}
                ],
                "formats": ["json"],
                "available_endpoints": ["info", "links", "versions", "structures"],
                "entry_types_by_format": {"json": ["structures"]},
                "is_index": false,
            }
        }
    }))
}

pub async fn links() -> Json<Value> {
    Json(json!({ "data": [] }))
}

pub async fn versions() -> &'static str {
    "version\r\n1.1\r\n"
}
