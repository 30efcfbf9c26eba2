//! `POST /gateways/{id}/queries` and `GET /queries/{id}` — the asynchronous
//! query variant (§4.G `run_async` / `get_query`).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gw_model::Query as QueryRecord;

use crate::error::GatewayApiError;
use crate::routes::gateways::FederatedListingParams;
use crate::state::AppState;

pub struct CreatedQueryResponse(QueryRecord);

impl IntoResponse for CreatedQueryResponse {
    fn into_response(self) -> Response {
        (StatusCode::ACCEPTED, Json(self.0)).into_response()
    }
}

pub async fn create(
    State(state): State<AppState>,
    Path(gateway_id): Path<String>,
    axum::extract::RawQuery(raw_query): axum::extract::RawQuery,
    Query(params): Query<FederatedListingParams>,
) -> Result<CreatedQueryResponse, GatewayApiError> {
    let gateway = state
        .registry
        .get(&gateway_id)
        .await
        .ok_or_else(|| GatewayApiError::UnknownGateway(gateway_id.clone()))?;

    let representation = raw_query.unwrap_or_default();
    let query = state
        .queries
        .create(gateway.id.clone(), "structures".to_string(), params.into_query_parameters(), representation)
        .await;

    let orchestrator = state.orchestrator.clone();
    let spawned_query = query.clone();
    tokio::spawn(async move {
        // Detached from the request's task: the client dropping its
        // connection must not cancel a query it already asked to run
        // asynchronously (§5).
        if let Err(error) = orchestrator.run(spawned_query, &gateway, None).await {
            tracing::error!(%error, "async query failed");
        }
    });

    Ok(CreatedQueryResponse(query))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<QueryRecord>, GatewayApiError> {
    state
        .queries
        .get_public(&id)
        .await
        .map(Json)
        .ok_or(GatewayApiError::UnknownQuery(id))
}
