//! Domain types shared by every layer of the gateway: database descriptors,
//! gateways, queries, and the opaque entry shape the merger rewrites.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type DatabaseId = String;
pub type GatewayId = String;
pub type QueryId = String;

/// A single upstream OPTIMADE database. Immutable after registration except
/// via explicit re-register.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Database {
    pub id: DatabaseId,
    pub name: String,
    pub base_url: url::Url,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub provider: serde_json::Map<String, serde_json::Value>,
}

fn default_version() -> String {
    "1.1".to_string()
}

/// An ordered-by-declaration set of databases plus a stable id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gateway {
    pub id: GatewayId,
    /// Declared order, as supplied by the caller. Used for fan-out order
    /// (spec §5: "task start order is the gateway's declared database order").
    pub databases: Vec<Database>,
    /// Canonicalised set of database ids, sorted ascending. Stored alongside
    /// `databases` so that set-equality lookups (interning, §4.C) are a plain
    /// equality query rather than an order-insensitive comparison at read time.
    pub database_id_set: Vec<DatabaseId>,
}

impl Gateway {
    pub fn new(id: GatewayId, databases: Vec<Database>) -> Self {
        let database_id_set = canonical_id_set(&databases);
        Self {
            id,
            databases,
            database_id_set,
        }
    }
}

/// Sorts and dedups a database set's ids into the canonical form used for
/// the interning equality index.
pub fn canonical_id_set(databases: &[Database]) -> Vec<DatabaseId> {
    databases
        .iter()
        .map(|d| d.id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Lifecycle state of a federated query. Strictly monotonic:
/// created < started < in_progress < finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    Created,
    Started,
    InProgress,
    Finished,
}

/// A long-lived record of one federated query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub id: QueryId,
    pub gateway_id: GatewayId,
    pub endpoint: String,
    pub query_parameters: serde_json::Map<String, serde_json::Value>,
    /// The literal query string as received by the gateway, echoed back
    /// verbatim in `meta.query.representation` (§4.F).
    pub representation: String,
    pub state: QueryState,
    pub response: Option<MergedResponse>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// The merged, protocol-compliant response produced by the merger (§4.F).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedResponse {
    pub data: Vec<serde_json::Value>,
    pub errors: Vec<SourceError>,
    pub meta: ResponseMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<ResponseLinks>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceError {
    pub source: DatabaseId,
    pub status: u16,
    pub detail: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub data_returned: u64,
    pub data_available: u64,
    pub more_data_available: bool,
    pub sources: std::collections::BTreeMap<DatabaseId, SourceStatus>,
    pub query: QueryMeta,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Ok,
    Error,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMeta {
    pub representation: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseLinks {
    pub next: String,
}

impl gw_store::Identifiable for Database {
    fn id(&self) -> &str {
        &self.id
    }
}

impl gw_store::Identifiable for Gateway {
    fn id(&self) -> &str {
        &self.id
    }
}

impl gw_store::Identifiable for Query {
    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db(id: &str) -> Database {
        Database {
            id: id.to_string(),
            name: id.to_string(),
            base_url: url::Url::parse("https://example.org/optimade").unwrap(),
            version: "1.1".to_string(),
            provider: Default::default(),
        }
    }

    #[test]
    fn canonical_id_set_sorts_and_dedups() {
        let dbs = vec![db("b"), db("a"), db("a")];
        assert_eq!(canonical_id_set(&dbs), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn query_state_is_strictly_ordered() {
        assert!(QueryState::Created < QueryState::Started);
        assert!(QueryState::Started < QueryState::InProgress);
        assert!(QueryState::InProgress < QueryState::Finished);
    }
}
