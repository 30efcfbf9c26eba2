use gw_client::UpstreamClient;
use gw_orchestrator::{Orchestrator, OrchestratorConfig};
use gw_queries::QueryStore;
use gw_registry::Registry;
use std::time::Duration;
use url::Url;

use crate::config::Config;

/// Everything a request handler needs, cloned cheaply into every request
/// (each field is itself an `Arc`-backed handle).
#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub queries: QueryStore,
    pub orchestrator: Orchestrator,
    /// A standalone handle for single-database operations (single-entry
    /// lookup, §4.G) that must not fan out through the orchestrator.
    pub client: UpstreamClient,
    pub per_db_timeout: Duration,
    pub base_url: Url,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        let registry = Registry::new();
        let queries = QueryStore::new();
        let client = UpstreamClient::new();
        let per_db_timeout = Duration::from_millis(config.per_db_timeout_ms);
        let orchestrator = Orchestrator::new(
            client.clone(),
            queries.clone(),
            OrchestratorConfig {
                per_db_timeout,
                gateway_timeout: Duration::from_millis(config.gateway_timeout_ms),
                max_concurrent_upstreams: config.max_concurrent_upstreams,
            },
        );

        Self {
            registry,
            queries,
            orchestrator,
            client,
            per_db_timeout,
            base_url: config.base_url.clone(),
        }
    }
}
