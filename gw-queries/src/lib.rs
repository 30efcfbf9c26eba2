//! Query record store: a thin CRUD wrapper around [`gw_store::Collection`]
//! over the `queries` collection, enforcing the monotonic state machine in
//! `gw_model::QueryState`.

use chrono::Utc;
use gw_model::{GatewayId, MergedResponse, Query, QueryId, QueryState};
use gw_store::Collection;
use serde_json::Map;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum QueryStoreError {
    #[error("no query with that id exists")]
    NotFound,
    #[error("illegal state transition from {from:?} to {to:?}")]
    InvalidTransition { from: QueryState, to: QueryState },
    #[error("a finished query's response must be present")]
    MissingResponse,
}

#[derive(Clone, Default)]
pub struct QueryStore {
    queries: Collection<Query>,
}

impl QueryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new record in state `created`.
    pub async fn create(
        &self,
        gateway_id: GatewayId,
        endpoint: String,
        query_parameters: Map<String, serde_json::Value>,
        representation: String,
    ) -> Query {
        let now = Utc::now();
        let query = Query {
            id: generate_query_id(),
            gateway_id,
            endpoint,
            query_parameters,
            representation,
            state: QueryState::Created,
            response: None,
            created_at: now,
            last_updated: now,
        };

        self.queries
            .insert(query.clone())
            .await
            .expect("freshly generated query ids do not collide");

        query
    }

    /// Advances `id` to `new_state`, enforcing strict monotonicity. A
    /// transition to `Finished` must carry `response`; any other
    /// destination must not.
    pub async fn advance(
        &self,
        id: &str,
        new_state: QueryState,
        response: Option<MergedResponse>,
    ) -> Result<Query, QueryStoreError> {
        if new_state == QueryState::Finished && response.is_none() {
            return Err(QueryStoreError::MissingResponse);
        }

        let mut result = Err(QueryStoreError::NotFound);
        self.queries
            .update(id, |q| {
                if new_state <= q.state {
                    result = Err(QueryStoreError::InvalidTransition {
                        from: q.state,
                        to: new_state,
                    });
                    return;
                }
                q.state = new_state;
                q.response = response;
                q.last_updated = Utc::now();
                result = Ok(q.clone());
            })
            .await
            .map_err(|_| QueryStoreError::NotFound)?;

        result
    }

    /// Returns the record with `response` present iff `state == finished`
    /// (which is always true by construction — `advance` never sets one
    /// without the other).
    pub async fn get_public(&self, id: &QueryId) -> Option<Query> {
        self.queries.get(id).await
    }
}

fn generate_query_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
