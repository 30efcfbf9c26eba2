//! Issues a single OPTIMADE request against one upstream database and
//! classifies the result. This is the only crate that ever talks to an
//! upstream over the network; it never retries — retry policy, if any,
//! belongs above it.

use serde_json::{Map, Value};
use std::error::Error as _;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// The three-way outcome of one upstream fetch.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Ok(Value),
    UpstreamError { status: u16, body: Value },
    TransportError { kind: TransportErrorKind, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Dns,
    Connect,
    Tls,
    Read,
    Decode,
}

impl TransportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Dns => "dns",
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Tls => "tls",
            TransportErrorKind::Read => "read",
            TransportErrorKind::Decode => "decode",
        }
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("failed to build request url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Thin wrapper over a shared `reqwest::Client`. Cheap to clone; holds only
/// the underlying connection pool handle.
#[derive(Clone, Default)]
pub struct UpstreamClient {
    http: reqwest::Client,
}

impl UpstreamClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Fetches `endpoint` (e.g. `"structures"`) from `base_url`, forwarding
    /// `params` verbatim as the query string, bounded by `timeout`. Never
    /// retries: a timed-out or failed request is reported as a
    /// [`FetchOutcome::TransportError`], not retried internally.
    pub async fn fetch(
        &self,
        base_url: &Url,
        version_path: &str,
        endpoint: &str,
        params: &Map<String, Value>,
        timeout: Duration,
    ) -> FetchOutcome {
        let url = match build_url(base_url, version_path, endpoint) {
            Ok(url) => url,
            Err(e) => {
                return FetchOutcome::TransportError {
                    kind: TransportErrorKind::Connect,
                    message: e.to_string(),
                };
            }
        };

        let query = query_pairs(params);

        let request = self.http.get(url).query(&query);

        // The whole round trip — header arrival and body read — is bounded
        // by one `timeout`. A source that sends headers then stalls the
        // body must be cancelled just as surely as one that never responds
        // at all (§4.B: "after `timeout`, the in-flight request is
        // cancelled").
        let send_and_decode = async {
            let response = request.send().await.map_err(|e| {
                (classify_reqwest_error(&e), e.to_string())
            })?;
            let status = response.status();
            let body: Value = response
                .json()
                .await
                .map_err(|e| (TransportErrorKind::Decode, e.to_string()))?;
            Ok((status, body))
        };

        let (status, body) = match tokio::time::timeout(timeout, send_and_decode).await {
            Ok(Ok(pair)) => pair,
            Ok(Err((kind, message))) => return FetchOutcome::TransportError { kind, message },
            Err(_) => {
                return FetchOutcome::TransportError {
                    kind: TransportErrorKind::Timeout,
                    message: format!("no response within {timeout:?}"),
                };
            }
        };

        if status.is_success() && has_data_or_errors(&body) {
            FetchOutcome::Ok(body)
        } else if status.is_success() {
            FetchOutcome::TransportError {
                kind: TransportErrorKind::Decode,
                message: "response body has neither a top-level `data` nor `errors` array"
                    .to_string(),
            }
        } else {
            FetchOutcome::UpstreamError {
                status: status.as_u16(),
                body,
            }
        }
    }
}

fn build_url(base_url: &Url, version_path: &str, endpoint: &str) -> Result<Url, url::ParseError> {
    let mut url = base_url.clone();
    let trimmed_base = url.path().trim_end_matches('/').to_string();
    let joined = format!("{trimmed_base}/{version_path}/{endpoint}");
    url.set_path(&joined);
    Ok(url)
}

fn query_pairs(params: &Map<String, Value>) -> Vec<(String, String)> {
    params
        .iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

fn has_data_or_errors(body: &Value) -> bool {
    body.get("data").is_some_and(Value::is_array) || body.get("errors").is_some_and(Value::is_array)
}

fn classify_reqwest_error(e: &reqwest::Error) -> TransportErrorKind {
    if e.is_timeout() {
        return TransportErrorKind::Timeout;
    }
    if e.is_connect() {
        let source = e.source().map(|s| s.to_string()).unwrap_or_default();
        if source.contains("dns") || source.contains("lookup") {
            return TransportErrorKind::Dns;
        }
        if source.contains("tls") || source.contains("certificate") {
            return TransportErrorKind::Tls;
        }
        return TransportErrorKind::Connect;
    }
    if e.is_decode() {
        return TransportErrorKind::Decode;
    }
    TransportErrorKind::Read
}
