//! `/gateways` and `/gateways/{id}/...` — gateway registration, resolution,
//! and the synchronous federated listing/entry endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gw_model::{Database, Gateway};
use gw_registry::DatabaseRef;
use serde::{Deserialize, Serialize};
use serde_json::Map;

use crate::error::GatewayApiError;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(untagged)]
enum DatabaseRefDto {
    Known(String),
    Full(Database),
}

impl From<DatabaseRefDto> for DatabaseRef {
    fn from(dto: DatabaseRefDto) -> Self {
        match dto {
            DatabaseRefDto::Known(id) => DatabaseRef::Known(id),
            DatabaseRefDto::Full(db) => DatabaseRef::Full(db),
        }
    }
}

#[derive(Deserialize)]
pub struct CreateGatewayRequest {
    databases: Vec<DatabaseRefDto>,
    id: Option<String>,
}

struct CreateGatewayResponse {
    gateway: Gateway,
    newly_created: bool,
}

impl IntoResponse for CreateGatewayResponse {
    fn into_response(self) -> Response {
        let status = if self.newly_created {
            StatusCode::CREATED
        } else {
            StatusCode::OK
        };
        (status, Json(self.gateway)).into_response()
    }
}

pub async fn create_or_resolve(
    State(state): State<AppState>,
    Json(request): Json<CreateGatewayRequest>,
) -> Result<CreateGatewayResponse, GatewayApiError> {
    let refs = request.databases.into_iter().map(DatabaseRef::from).collect();
    let (gateway, newly_created) = state.registry.resolve_or_create(refs, request.id).await?;
    Ok(CreateGatewayResponse { gateway, newly_created })
}

#[derive(Deserialize)]
pub struct ListGatewaysParams {
    page_limit: Option<usize>,
    page_offset: Option<usize>,
    filter: Option<String>,
}

#[derive(Serialize)]
struct ListGatewaysResponse {
    data: Vec<Gateway>,
    meta: ListMeta,
}

#[derive(Serialize)]
struct ListMeta {
    data_returned: usize,
    data_available: usize,
    more_data_available: bool,
}

const DEFAULT_PAGE_LIMIT: usize = 20;

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListGatewaysParams>,
) -> Result<Json<ListGatewaysResponse>, GatewayApiError> {
    if params.filter.is_some() {
        return Err(GatewayApiError::FilterNotSupported);
    }

    let offset = params.page_offset.unwrap_or(0);
    let limit = params.page_limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    let (data, total) = state.registry.list(offset, limit).await;

    let more_data_available = offset + data.len() < total;
    Ok(Json(ListGatewaysResponse {
        meta: ListMeta {
            data_returned: data.len(),
            data_available: total,
            more_data_available,
        },
        data,
    }))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Gateway>, GatewayApiError> {
    state
        .registry
        .get(&id)
        .await
        .map(Json)
        .ok_or(GatewayApiError::UnknownGateway(id))
}

#[derive(Deserialize, Default)]
pub struct FederatedListingParams {
    pub filter: Option<String>,
    pub response_format: Option<String>,
    pub response_fields: Option<String>,
    pub sort: Option<String>,
    pub page_limit: Option<u64>,
    pub page_offset: Option<u64>,
    pub include: Option<String>,
}

impl FederatedListingParams {
    pub fn into_query_parameters(self) -> Map<String, serde_json::Value> {
        let mut map = Map::new();
        if let Some(v) = self.filter {
            map.insert("filter".to_string(), v.into());
        }
        if let Some(v) = self.response_format {
            map.insert("response_format".to_string(), v.into());
        }
        if let Some(v) = self.response_fields {
            map.insert("response_fields".to_string(), v.into());
        }
        if let Some(v) = self.sort {
            map.insert("sort".to_string(), v.into());
        }
        if let Some(v) = self.page_limit {
            map.insert("page_limit".to_string(), v.into());
        }
        if let Some(v) = self.page_offset {
            map.insert("page_offset".to_string(), v.into());
        }
        if let Some(v) = self.include {
            map.insert("include".to_string(), v.into());
        }
        map
    }
}

pub async fn structures(
    State(state): State<AppState>,
    Path(id): Path<String>,
    axum::extract::RawQuery(raw_query): axum::extract::RawQuery,
    Query(params): Query<FederatedListingParams>,
) -> Result<Json<gw_model::MergedResponse>, GatewayApiError> {
    let gateway = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| GatewayApiError::UnknownGateway(id.clone()))?;

    let representation = raw_query.unwrap_or_default();
    let query_parameters = params.into_query_parameters();

    let query = state
        .queries
        .create(gateway.id.clone(), "structures".to_string(), query_parameters, representation)
        .await;

    let request_url = request_url(&state, &id, &query.representation);
    let finished = state.orchestrator.run(query, &gateway, Some(&request_url)).await?;

    Ok(Json(finished.response.expect("run() always finishes with a response")))
}

pub async fn structures_entry(
    State(state): State<AppState>,
    Path((id, entry_ref)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, GatewayApiError> {
    let gateway = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| GatewayApiError::UnknownGateway(id.clone()))?;

    let (db_id, original_id) = entry_ref
        .split_once('/')
        .ok_or_else(|| GatewayApiError::MalformedEntryRef(entry_ref.clone()))?;

    let database = gateway
        .databases
        .iter()
        .find(|d| d.id == db_id)
        .ok_or_else(|| GatewayApiError::MalformedEntryRef(entry_ref.clone()))?;

    let version_path = gw_orchestrator::version_path(&database.version);
    let endpoint = format!("structures/{original_id}");

    let outcome = state
        .client
        .fetch(&database.base_url, &version_path, &endpoint, &Map::new(), state.per_db_timeout)
        .await;

    match outcome {
        gw_client::FetchOutcome::Ok(body) => Ok(Json(body)),
        gw_client::FetchOutcome::UpstreamError { status, body } => {
            tracing::warn!(%status, %db_id, "upstream rejected single-entry lookup");
            Ok(Json(body))
        }
        gw_client::FetchOutcome::TransportError { kind, message } => {
            Err(GatewayApiError::SingleEntryLookupFailed(
                db_id.to_string(),
                format!("{}: {message}", kind.as_str()),
            ))
        }
    }
}

fn request_url(state: &AppState, gateway_id: &str, representation: &str) -> url::Url {
    let mut url = state.base_url.clone();
    url.set_path(&format!("/gateways/{gateway_id}/structures"));
    url.set_query(Some(representation));
    url
}
