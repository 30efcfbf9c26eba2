//! Maps every inner crate's error enum onto the OPTIMADE error envelope,
//! following `ingest-router::errors::IngestRouterError`'s `status_code()` +
//! `into_response()` pairing and `locator::api::LocatorError`'s direct
//! `IntoResponse` impl.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gw_orchestrator::OrchestratorError;
use gw_queries::QueryStoreError;
use gw_registry::RegistryError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayApiError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    QueryStore(#[from] QueryStoreError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error("no gateway with id '{0}'")]
    UnknownGateway(String),
    #[error("no query with id '{0}'")]
    UnknownQuery(String),
    #[error("entry_ref '{0}' is not a valid prefixed id")]
    MalformedEntryRef(String),
    #[error("filter is not supported at this endpoint")]
    FilterNotSupported,
    #[error("upstream lookup for '{0}' failed: {1}")]
    SingleEntryLookupFailed(String, String),
}

impl GatewayApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayApiError::Registry(RegistryError::GatewayExists) => StatusCode::CONFLICT,
            GatewayApiError::Registry(RegistryError::UnknownDatabase(_)) => StatusCode::BAD_REQUEST,
            GatewayApiError::Registry(RegistryError::Inconsistent) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayApiError::QueryStore(QueryStoreError::NotFound) => StatusCode::NOT_FOUND,
            GatewayApiError::QueryStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayApiError::Orchestrator(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayApiError::UnknownGateway(_) => StatusCode::NOT_FOUND,
            GatewayApiError::UnknownQuery(_) => StatusCode::NOT_FOUND,
            GatewayApiError::MalformedEntryRef(_) => StatusCode::BAD_REQUEST,
            GatewayApiError::FilterNotSupported => StatusCode::BAD_REQUEST,
            GatewayApiError::SingleEntryLookupFailed(_, _) => StatusCode::BAD_GATEWAY,
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    errors: Vec<ErrorEntry>,
}

#[derive(Serialize)]
struct ErrorEntry {
    status: String,
    title: String,
    detail: String,
    source: Option<String>,
}

impl IntoResponse for GatewayApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let source = match &self {
            GatewayApiError::Registry(RegistryError::UnknownDatabase(id)) => Some(id.clone()),
            GatewayApiError::UnknownGateway(id) => Some(id.clone()),
            GatewayApiError::UnknownQuery(id) => Some(id.clone()),
            _ => None,
        };

        let body = ErrorEnvelope {
            errors: vec![ErrorEntry {
                status: status.as_u16().to_string(),
                title: status
                    .canonical_reason()
                    .unwrap_or("error")
                    .to_string(),
                detail: self.to_string(),
                source,
            }],
        };

        (status, Json(body)).into_response()
    }
}
