//! Runs one federated query to completion: fans it out to every database in
//! the gateway, in parallel, bounded by a configurable concurrency limit and
//! two composable deadlines, then hands the outcomes to the merger.
//!
//! Grounded on `ingest-router::executor::UpstreamTaskExecutor`: a `JoinSet`
//! of per-upstream tasks, collected with a deadline raced via
//! `tokio::select!`, with any task still outstanding at the deadline
//! aborted and counted as a timeout rather than silently dropped. The
//! teacher's two-phase *adaptive* deadline (short-circuit once the first
//! upstream succeeds) is not carried over: §8 scenario 3 requires a flat
//! `gateway_timeout` that every upstream — fast or slow — is bound by
//! alike, so a single race against one `gateway_timeout` sleep is used
//! instead of the teacher's `CollectionState` state machine. A
//! `tokio::sync::Semaphore`, acquired before each task is spawned, adds the
//! explicit `max_concurrent_upstreams` bound the teacher's executor (built
//! for a handful of cells) does not need but this gateway's arbitrarily
//! large database sets do; acquiring permits in declared-database order
//! gives the FIFO admission order §5 asks for.

use gw_client::{FetchOutcome, TransportErrorKind, UpstreamClient};
use gw_merger::ResponseMerger;
use gw_model::{Database, DatabaseId, Gateway, Query, QueryState};
use gw_queries::{QueryStore, QueryStoreError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("query store error: {0}")]
    QueryStore(#[from] QueryStoreError),
}

#[derive(Clone, Copy, Debug)]
pub struct OrchestratorConfig {
    pub per_db_timeout: Duration,
    pub gateway_timeout: Duration,
    pub max_concurrent_upstreams: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            per_db_timeout: Duration::from_millis(240_000),
            gateway_timeout: Duration::from_millis(260_000),
            max_concurrent_upstreams: 10,
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    client: UpstreamClient,
    queries: QueryStore,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(client: UpstreamClient, queries: QueryStore, config: OrchestratorConfig) -> Self {
        Self {
            client,
            queries,
            config,
        }
    }

    /// Runs `query` against `gateway` to completion and returns the updated
    /// record. Safe to `.await` directly (the synchronous endpoint variant)
    /// or to `tokio::spawn` detached (the async endpoint variant, §4.G) —
    /// `run` itself does not care which.
    pub async fn run(
        &self,
        query: Query,
        gateway: &Gateway,
        request_url: Option<&url::Url>,
    ) -> Result<Query, OrchestratorError> {
        self.queries
            .advance(&query.id, QueryState::Started, None)
            .await?;

        let mut join_set = self.spawn_fanout(gateway, &query);

        self.queries
            .advance(&query.id, QueryState::InProgress, None)
            .await?;

        let outcomes = self.collect_with_deadline(&mut join_set, gateway).await;

        let merged = self.merge(gateway, &query, outcomes, request_url);

        self.queries
            .advance(&query.id, QueryState::Finished, Some(merged))
            .await
            .map_err(OrchestratorError::from)
    }

    fn spawn_fanout(
        &self,
        gateway: &Gateway,
        query: &Query,
    ) -> JoinSet<(DatabaseId, FetchOutcome)> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_upstreams.max(1)));
        let mut join_set = JoinSet::new();

        for db in &gateway.databases {
            // Acquiring permits in declared order, before spawning, gives
            // FIFO admission: the (N - C) excess databases queue for a slot
            // in the order they were declared, not the order their tasks
            // happen to get polled.
            let permit = semaphore.clone().try_acquire_owned();
            let permit = match permit {
                Ok(permit) => Some(permit),
                Err(_) => None,
            };

            let client = self.client.clone();
            let db_id = db.id.clone();
            let base_url = db.base_url.clone();
            let version_path = version_path(&db.version);
            let endpoint = query.endpoint.clone();
            let params = query.query_parameters.clone();
            let timeout = self.config.per_db_timeout;
            let semaphore = semaphore.clone();

            join_set.spawn(async move {
                let _permit = match permit {
                    Some(p) => p,
                    None => semaphore
                        .acquire_owned()
                        .await
                        .expect("semaphore is never closed"),
                };
                let outcome = client.fetch(&base_url, &version_path, &endpoint, &params, timeout).await;
                (db_id, outcome)
            });
        }

        join_set
    }

    async fn collect_with_deadline(
        &self,
        join_set: &mut JoinSet<(DatabaseId, FetchOutcome)>,
        gateway: &Gateway,
    ) -> HashMap<DatabaseId, FetchOutcome> {
        let mut outcomes = HashMap::new();
        let mut remaining: std::collections::HashSet<DatabaseId> =
            gateway.databases.iter().map(|d| d.id.clone()).collect();

        let deadline = tokio::time::sleep(self.config.gateway_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = join_set.join_next() => {
                    match joined {
                        Some(Ok((db_id, outcome))) => {
                            remaining.remove(&db_id);
                            outcomes.insert(db_id, outcome);
                        }
                        Some(Err(join_err)) => {
                            tracing::error!(error = %join_err, "upstream task panicked or was cancelled");
                        }
                        None => break,
                    }
                }
                _ = &mut deadline => {
                    tracing::warn!("gateway_timeout exceeded, aborting outstanding upstream tasks");
                    join_set.abort_all();
                    break;
                }
            }
        }

        // Drain anything still completing right as we aborted.
        while let Some(joined) = join_set.join_next().await {
            if let Ok((db_id, outcome)) = joined {
                remaining.remove(&db_id);
                outcomes.insert(db_id, outcome);
            }
        }

        for db_id in remaining {
            outcomes.insert(
                db_id,
                FetchOutcome::TransportError {
                    kind: TransportErrorKind::Timeout,
                    message: "gateway_timeout exceeded before this upstream responded".to_string(),
                },
            );
        }

        outcomes
    }

    fn merge(
        &self,
        gateway: &Gateway,
        query: &Query,
        outcomes: HashMap<DatabaseId, FetchOutcome>,
        request_url: Option<&url::Url>,
    ) -> gw_model::MergedResponse {
        let mut merger = ResponseMerger::new();
        for db in &gateway.databases {
            let outcome = outcomes.get(&db.id).cloned().unwrap_or_else(|| {
                FetchOutcome::TransportError {
                    kind: TransportErrorKind::Timeout,
                    message: "no outcome recorded for this database".to_string(),
                }
            });
            merger.add_outcome(&db.id, &outcome);
        }

        let representation = query.representation.clone();
        let (page_offset, page_limit) = paging_of(query);

        merger.finish(representation, request_url, page_offset, page_limit)
    }
}

/// Maps an OPTIMADE version string (e.g. `"1.1"`) to its URL version
/// segment (e.g. `"v1"`). Exposed for callers that bypass the orchestrator
/// for a single-database fetch (single-entry lookups, §4.G) but still need
/// to address the same versioned path.
pub fn version_path(version: &str) -> String {
    let major = version.split('.').next().unwrap_or(version);
    format!("v{major}")
}

fn paging_of(query: &Query) -> (u64, Option<u64>) {
    let offset = query
        .query_parameters
        .get("page_offset")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let limit = query.query_parameters.get("page_limit").and_then(|v| v.as_u64());
    (offset, limit)
}

#[allow(dead_code)]
fn database_fixture(id: &str, base_url: &str) -> Database {
    Database {
        id: id.to_string(),
        name: id.to_string(),
        base_url: url::Url::parse(base_url).unwrap(),
        version: "1.1".to_string(),
        provider: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_model::QueryState;
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use hyper_util::rt::{TokioExecutor, TokioIo};
    use serde_json::Map;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::net::TcpListener;

    async fn start_mock_upstream(body: serde_json::Value, delay: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let io = TokioIo::new(stream);
                let body = body.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |_req: Request<hyper::body::Incoming>| {
                        let body = body.clone();
                        async move {
                            if !delay.is_zero() {
                                tokio::time::sleep(delay).await;
                            }
                            let json = serde_json::to_vec(&body).unwrap();
                            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(json))))
                        }
                    });
                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        format!("http://127.0.0.1:{port}")
    }

    fn gateway_of(databases: Vec<Database>) -> Gateway {
        Gateway::new("gw1".to_string(), databases)
    }

    #[tokio::test]
    async fn scenario_1_two_successful_upstreams_merge() {
        let url1 = start_mock_upstream(
            serde_json::json!({"data": [{"id": "a", "type": "structures"}], "meta": {"data_returned": 1, "data_available": 10, "more_data_available": true}}),
            Duration::ZERO,
        )
        .await;
        let url2 = start_mock_upstream(
            serde_json::json!({"data": [{"id": "b", "type": "structures"}], "meta": {"data_returned": 1, "data_available": 5, "more_data_available": false}}),
            Duration::ZERO,
        )
        .await;

        let gateway = gateway_of(vec![database_fixture("D1", &url1), database_fixture("D2", &url2)]);
        let queries = QueryStore::new();
        let query = queries.create(gateway.id.clone(), "structures".to_string(), Map::new(), String::new()).await;

        let orchestrator = Orchestrator::new(
            UpstreamClient::new(),
            queries,
            OrchestratorConfig {
                per_db_timeout: Duration::from_secs(5),
                gateway_timeout: Duration::from_secs(10),
                max_concurrent_upstreams: 10,
            },
        );

        let finished = orchestrator.run(query, &gateway, None).await.unwrap();
        assert_eq!(finished.state, QueryState::Finished);
        let response = finished.response.unwrap();
        assert_eq!(response.data.len(), 2);
        assert_eq!(response.data[0]["id"], "D1/a");
        assert_eq!(response.data[1]["id"], "D2/b");
        assert_eq!(response.meta.data_available, 15);
        assert!(response.errors.is_empty());
    }

    #[tokio::test]
    async fn scenario_2_one_upstream_errors_is_not_fatal() {
        let url1 = start_mock_upstream(
            serde_json::json!({"data": [{"id": "a", "type": "structures"}], "meta": {}}),
            Duration::ZERO,
        )
        .await;

        // A database with no listener behind it: every request transport-fails.
        let gateway = gateway_of(vec![
            database_fixture("D1", &url1),
            database_fixture("D2", "http://127.0.0.1:1"),
        ]);
        let queries = QueryStore::new();
        let query = queries.create(gateway.id.clone(), "structures".to_string(), Map::new(), String::new()).await;

        let orchestrator = Orchestrator::new(
            UpstreamClient::new(),
            queries,
            OrchestratorConfig {
                per_db_timeout: Duration::from_secs(5),
                gateway_timeout: Duration::from_secs(10),
                max_concurrent_upstreams: 10,
            },
        );

        let finished = orchestrator.run(query, &gateway, None).await.unwrap();
        let response = finished.response.unwrap();
        assert_eq!(response.data.len(), 1);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].source, "D2");
    }

    #[tokio::test]
    async fn scenario_3_gateway_timeout_bounds_the_whole_query() {
        let url1 = start_mock_upstream(serde_json::json!({"data": [], "meta": {}}), Duration::from_millis(600)).await;

        let gateway = gateway_of(vec![database_fixture("D1", &url1)]);
        let queries = QueryStore::new();
        let query = queries.create(gateway.id.clone(), "structures".to_string(), Map::new(), String::new()).await;

        let orchestrator = Orchestrator::new(
            UpstreamClient::new(),
            queries,
            OrchestratorConfig {
                per_db_timeout: Duration::from_secs(5),
                gateway_timeout: Duration::from_millis(100),
                max_concurrent_upstreams: 10,
            },
        );

        let start = std::time::Instant::now();
        let finished = orchestrator.run(query, &gateway, None).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(500));

        let response = finished.response.unwrap();
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].status, 504);
        assert!(response.errors[0].detail.contains("timeout"));
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_max_concurrent_upstreams() {
        let in_flight = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let in_flight_accept = in_flight.clone();
        let max_seen_accept = max_seen.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                let io = TokioIo::new(stream);
                let in_flight = in_flight_accept.clone();
                let max_seen = max_seen_accept.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |_req: Request<hyper::body::Incoming>| {
                        let in_flight = in_flight.clone();
                        let max_seen = max_seen.clone();
                        async move {
                            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                            let json = serde_json::to_vec(&serde_json::json!({"data": [], "meta": {}})).unwrap();
                            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(json))))
                        }
                    });
                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await;
                });
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let base = format!("http://127.0.0.1:{port}");
        let databases: Vec<Database> = (0..6).map(|i| database_fixture(&format!("D{i}"), &base)).collect();
        let gateway = gateway_of(databases);
        let queries = QueryStore::new();
        let query = queries.create(gateway.id.clone(), "structures".to_string(), Map::new(), String::new()).await;

        let orchestrator = Orchestrator::new(
            UpstreamClient::new(),
            queries,
            OrchestratorConfig {
                per_db_timeout: Duration::from_secs(5),
                gateway_timeout: Duration::from_secs(5),
                max_concurrent_upstreams: 2,
            },
        );

        orchestrator.run(query, &gateway, None).await.unwrap();
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }
}
