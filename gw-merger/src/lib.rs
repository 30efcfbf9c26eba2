//! Combines per-upstream fetch outcomes into a single protocol-compliant
//! federated response.
//!
//! Structured like `ingest-router::relay_project_config_handler::merger::MergedResults`:
//! an accumulator with one `merge_*`/`add_*` method per output field, fed
//! one source outcome at a time, then rendered with a single `finish(...)`
//! call. The per-field strategies themselves are OPTIMADE's, not the
//! teacher's Sentry-specific config-merge rules:
//!
//! - `data`: id-prefixed concatenation in declaration order (never sorted
//!   or deduplicated across sources — that is out of scope, see spec §4.F).
//! - `meta.data_returned` / `meta.data_available`: numeric sum.
//! - `meta.more_data_available`: logical OR.
//! - `meta.sources`: per-source ok/error status map.
//! - `errors`: one structured entry per non-ok source.

use gw_client::{FetchOutcome, TransportErrorKind};
use gw_model::{DatabaseId, MergedResponse, QueryMeta, ResponseLinks, ResponseMeta, SourceError, SourceStatus};
use std::collections::BTreeMap;
use url::Url;

/// Accumulates per-source outcomes, in the gateway's declared database
/// order, into a [`MergedResponse`].
#[derive(Default)]
pub struct ResponseMerger {
    data: Vec<serde_json::Value>,
    errors: Vec<SourceError>,
    data_returned: u64,
    data_available: u64,
    more_data_available: bool,
    sources: BTreeMap<DatabaseId, SourceStatus>,
}

impl ResponseMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds in one source's outcome. Must be called once per database in
    /// the gateway, in any order — the merger does not depend on arrival
    /// order (§4.E concurrency contract).
    pub fn add_outcome(&mut self, database_id: &DatabaseId, outcome: &FetchOutcome) {
        match outcome {
            FetchOutcome::Ok(body) => self.merge_ok(database_id, body),
            FetchOutcome::UpstreamError { status, body } => {
                self.add_error(
                    database_id,
                    *status,
                    extract_detail(body),
                    "upstream_error",
                );
            }
            FetchOutcome::TransportError { kind, message } => {
                self.add_error(
                    database_id,
                    504,
                    format!("{}: {message}", kind.as_str()),
                    transport_error_type(*kind),
                );
            }
        }
    }

    fn merge_ok(&mut self, database_id: &DatabaseId, body: &serde_json::Value) {
        let entries = body.get("data").and_then(|d| d.as_array()).cloned().unwrap_or_default();
        let returned = entries.len() as u64;

        for mut entry in entries {
            rewrite_entry_id(&mut entry, database_id);
            self.data.push(entry);
        }

        let meta = body.get("meta");
        self.data_returned += meta
            .and_then(|m| m.get("data_returned"))
            .and_then(|v| v.as_u64())
            .unwrap_or(returned);
        self.data_available += meta
            .and_then(|m| m.get("data_available"))
            .and_then(|v| v.as_u64())
            .unwrap_or(returned);
        self.more_data_available |= meta
            .and_then(|m| m.get("more_data_available"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        self.sources.insert(database_id.clone(), SourceStatus::Ok);
    }

    fn add_error(&mut self, database_id: &DatabaseId, status: u16, detail: String, kind: &str) {
        self.errors.push(SourceError {
            source: database_id.clone(),
            status,
            detail,
            kind: kind.to_string(),
        });
        self.sources.insert(database_id.clone(), SourceStatus::Error);
    }

    /// Renders the accumulated state into a [`MergedResponse`].
    ///
    /// `request_url` / `page_limit` are used to synthesize `links.next`
    /// when `more_data_available` is true, by re-emitting the caller's URL
    /// with `page_offset` advanced by `page_limit` (§4.F). `representation`
    /// is the literal query string as received by the gateway, echoed back
    /// verbatim in `meta.query.representation`.
    pub fn finish(
        self,
        representation: String,
        request_url: Option<&Url>,
        page_offset: u64,
        page_limit: Option<u64>,
    ) -> MergedResponse {
        let links = if self.more_data_available {
            request_url
                .zip(page_limit)
                .map(|(url, limit)| ResponseLinks {
                    next: next_page_url(url, page_offset + limit),
                })
        } else {
            None
        };

        MergedResponse {
            data: self.data,
            errors: self.errors,
            meta: ResponseMeta {
                data_returned: self.data_returned,
                data_available: self.data_available,
                more_data_available: self.more_data_available,
                sources: self.sources,
                query: QueryMeta { representation },
            },
            links,
        }
    }
}

fn rewrite_entry_id(entry: &mut serde_json::Value, database_id: &DatabaseId) {
    if let Some(obj) = entry.as_object_mut() {
        if let Some(original_id) = obj.get("id").and_then(|v| v.as_str()).map(str::to_string) {
            obj.insert(
                "id".to_string(),
                serde_json::Value::String(format!("{database_id}/{original_id}")),
            );
        }
    }
}

fn extract_detail(body: &serde_json::Value) -> String {
    body.get("errors")
        .and_then(|e| e.as_array())
        .and_then(|a| a.first())
        .and_then(|e| e.get("detail"))
        .and_then(|d| d.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

fn transport_error_type(kind: TransportErrorKind) -> &'static str {
    match kind {
        TransportErrorKind::Timeout => "timeout",
        _ => "transport_error",
    }
}

fn next_page_url(url: &Url, new_offset: u64) -> String {
    let mut url = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "page_offset")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(pairs)
        .append_pair("page_offset", &new_offset.to_string());

    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(data: serde_json::Value, meta: serde_json::Value) -> FetchOutcome {
        FetchOutcome::Ok(serde_json::json!({"data": data, "meta": meta}))
    }

    #[test]
    fn scenario_1_two_successful_sources_merge_cleanly() {
        let mut merger = ResponseMerger::new();
        merger.add_outcome(
            &"D1".to_string(),
            &ok(
                serde_json::json!([{"id": "a", "type": "structures"}]),
                serde_json::json!({"data_returned": 1, "data_available": 10, "more_data_available": true}),
            ),
        );
        merger.add_outcome(
            &"D2".to_string(),
            &ok(
                serde_json::json!([{"id": "b", "type": "structures"}]),
                serde_json::json!({"data_returned": 1, "data_available": 5, "more_data_available": false}),
            ),
        );

        let response = merger.finish("filter=...".to_string(), None, 0, None);

        assert_eq!(response.data.len(), 2);
        assert_eq!(response.data[0]["id"], "D1/a");
        assert_eq!(response.data[1]["id"], "D2/b");
        assert_eq!(response.meta.data_returned, 2);
        assert_eq!(response.meta.data_available, 15);
        assert!(response.meta.more_data_available);
        assert!(response.errors.is_empty());
    }

    #[test]
    fn scenario_2_one_upstream_errors() {
        let mut merger = ResponseMerger::new();
        merger.add_outcome(
            &"D1".to_string(),
            &ok(
                serde_json::json!([{"id": "a", "type": "structures"}]),
                serde_json::json!({"data_returned": 1, "data_available": 1}),
            ),
        );
        merger.add_outcome(
            &"D2".to_string(),
            &FetchOutcome::UpstreamError {
                status: 500,
                body: serde_json::json!({"errors": [{"detail": "boom"}]}),
            },
        );

        let response = merger.finish("".to_string(), None, 0, None);

        assert_eq!(response.data, vec![serde_json::json!({"id": "D1/a", "type": "structures"})]);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].source, "D2");
        assert_eq!(response.errors[0].status, 500);
        assert_eq!(response.meta.sources.get("D1"), Some(&SourceStatus::Ok));
        assert_eq!(response.meta.sources.get("D2"), Some(&SourceStatus::Error));
    }

    #[test]
    fn scenario_3_timeout_becomes_504_with_timeout_in_detail() {
        let mut merger = ResponseMerger::new();
        merger.add_outcome(
            &"D2".to_string(),
            &FetchOutcome::TransportError {
                kind: TransportErrorKind::Timeout,
                message: "no response within 30s".to_string(),
            },
        );

        let response = merger.finish("".to_string(), None, 0, None);
        assert_eq!(response.errors[0].status, 504);
        assert!(response.errors[0].detail.contains("timeout"));
    }

    #[test]
    fn links_next_advances_page_offset_by_page_limit() {
        let mut merger = ResponseMerger::new();
        merger.add_outcome(
            &"D1".to_string(),
            &ok(
                serde_json::json!([]),
                serde_json::json!({"more_data_available": true}),
            ),
        );

        let url = Url::parse("https://gw.example.org/gateways/g1/structures?page_limit=10&page_offset=0").unwrap();
        let response = merger.finish("".to_string(), Some(&url), 0, Some(10));

        let next = response.links.unwrap().next;
        assert!(next.contains("page_offset=10"));
        assert!(next.contains("page_limit=10"));
    }

    #[test]
    fn no_links_next_when_more_data_available_is_false() {
        let mut merger = ResponseMerger::new();
        merger.add_outcome(&"D1".to_string(), &ok(serde_json::json!([]), serde_json::json!({})));
        let response = merger.finish("".to_string(), None, 0, Some(10));
        assert!(response.links.is_none());
    }

    #[test]
    fn pagination_multiplicity_is_preserved_not_trimmed() {
        // Each upstream gets the full page_limit, so N upstreams can together
        // return up to N * page_limit entries in one merged page (spec §9).
        let mut merger = ResponseMerger::new();
        for id in ["D1", "D2", "D3"] {
            merger.add_outcome(
                &id.to_string(),
                &ok(
                    serde_json::json!([{"id": "x", "type": "structures"}, {"id": "y", "type": "structures"}]),
                    serde_json::json!({}),
                ),
            );
        }
        let response = merger.finish("".to_string(), None, 0, Some(2));
        assert_eq!(response.data.len(), 6, "3 sources * page_limit=2 entries each");
    }
}
