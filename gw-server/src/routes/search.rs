//! `GET /search` — convenience endpoint equivalent to a `POST /gateways`
//! followed immediately by a synchronous federated listing, in one call
//! (§4.G).

use axum::extract::{Query, State};
use axum::Json;
use gw_registry::DatabaseRef;
use serde::Deserialize;

use crate::error::GatewayApiError;
use crate::routes::gateways::FederatedListingParams;
use crate::state::AppState;

// `#[serde(flatten)]` would be the natural way to embed
// `FederatedListingParams` here, but axum's `Query` extractor deserializes
// via `serde_urlencoded`, which buffers flattened fields as strings before
// re-decoding them — that re-decode fails for the numeric `page_limit`/
// `page_offset` fields (`Option<u64>`). So the listing fields are repeated
// here, flat, and assembled into a `FederatedListingParams` by hand.
#[derive(Deserialize)]
pub struct SearchParams {
    /// Comma-separated list of already-registered database ids.
    databases: String,
    filter: Option<String>,
    response_format: Option<String>,
    response_fields: Option<String>,
    sort: Option<String>,
    page_limit: Option<u64>,
    page_offset: Option<u64>,
    include: Option<String>,
}

impl SearchParams {
    fn into_listing(self) -> FederatedListingParams {
        FederatedListingParams {
            filter: self.filter,
            response_format: self.response_format,
            response_fields: self.response_fields,
            sort: self.sort,
            page_limit: self.page_limit,
            page_offset: self.page_offset,
            include: self.include,
        }
    }
}

pub async fn search(
    State(state): State<AppState>,
    axum::extract::RawQuery(raw_query): axum::extract::RawQuery,
    Query(params): Query<SearchParams>,
) -> Result<Json<gw_model::MergedResponse>, GatewayApiError> {
    let refs = params
        .databases
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|id| DatabaseRef::Known(id.to_string()))
        .collect();

    let (gateway, _newly_created) = state.registry.resolve_or_create(refs, None).await?;

    let representation = raw_query.unwrap_or_default();
    let query_parameters = params.into_listing().into_query_parameters();

    let query = state
        .queries
        .create(gateway.id.clone(), "structures".to_string(), query_parameters, representation)
        .await;

    let mut request_url = state.base_url.clone();
    request_url.set_path("/search");
    request_url.set_query(Some(&query.representation));

    let finished = state.orchestrator.run(query, &gateway, Some(&request_url)).await?;
    Ok(Json(finished.response.expect("run() always finishes with a response")))
}
