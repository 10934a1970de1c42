//! The concrete `BulkBackend`: a bulk-index HTTP POST against a search
//! backend, with connection-level retry internal to `submit` (spec.md
//! §4.6: "retried by the backend client's exponential backoff (min 5 s,
//! max 24 h)").

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use lc_protocol::Op;

use super::bulk::{BulkBackend, BulkItemFailure, BulkResponse, BulkSubmitError};

const MIN_BACKOFF: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

pub struct HttpBulkBackend {
    client: reqwest::Client,
    bulk_url: String,
}

impl HttpBulkBackend {
    pub fn new(backend_url: impl Into<String>) -> Self {
        HttpBulkBackend {
            client: reqwest::Client::new(),
            bulk_url: backend_url.into(),
        }
    }

    async fn post_bulk(&self, body: &[u8]) -> reqwest::Result<BulkApiResponse> {
        self.client
            .post(&self.bulk_url)
            .header("content-type", "application/x-ndjson")
            .body(body.to_vec())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

impl BulkBackend for HttpBulkBackend {
    async fn submit(&self, batch: &[Op]) -> Result<BulkResponse, BulkSubmitError> {
        let body = encode_ndjson(batch);
        let mut backoff = MIN_BACKOFF;
        loop {
            match self.post_bulk(&body).await {
                Ok(resp) => return Ok(to_bulk_response(resp)),
                Err(e) => {
                    warn!(error = %e, backoff_secs = backoff.as_secs(), "bulk backend connection error, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

/// One bulk action line pair per Op: an `index` action header followed by
/// the flattened document body, newline-delimited.
fn encode_ndjson(batch: &[Op]) -> Vec<u8> {
    let mut out = Vec::new();
    for op in batch {
        let action = serde_json::json!({ "index": { "_index": op.index } });
        out.extend_from_slice(action.to_string().as_bytes());
        out.push(b'\n');
        out.extend_from_slice(&op.body);
        out.push(b'\n');
    }
    out
}

#[derive(Debug, Deserialize)]
struct BulkApiResponse {
    #[serde(default)]
    items: Vec<BulkApiItem>,
}

#[derive(Debug, Deserialize)]
struct BulkApiItem {
    #[serde(alias = "index", alias = "create")]
    index: Option<BulkApiAction>,
}

#[derive(Debug, Deserialize)]
struct BulkApiAction {
    #[serde(default)]
    error: Option<Value>,
}

fn to_bulk_response(resp: BulkApiResponse) -> BulkResponse {
    let failures = resp
        .items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| {
            let action = item.index?;
            let error = action.error?;
            let reason = error
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_owned();
            Some(BulkItemFailure { index: i, reason })
        })
        .collect();
    BulkResponse { failures }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_one_action_and_document_pair_per_op() {
        let batch = vec![Op::new("debug-test-2020-01-01".to_owned(), br#"{"a":1}"#.to_vec())];
        let body = String::from_utf8(encode_ndjson(&batch)).unwrap();
        let mut lines = body.lines();
        assert!(lines.next().unwrap().contains("\"_index\":\"debug-test-2020-01-01\""));
        assert_eq!(lines.next().unwrap(), r#"{"a":1}"#);
        assert!(lines.next().is_none());
    }

    #[test]
    fn maps_per_item_errors_to_failures_by_position() {
        let resp = BulkApiResponse {
            items: vec![
                BulkApiItem { index: Some(BulkApiAction { error: None }) },
                BulkApiItem {
                    index: Some(BulkApiAction { error: Some(serde_json::json!({"reason": "closed"})) }),
                },
            ],
        };
        let out = to_bulk_response(resp);
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].index, 1);
        assert_eq!(out.failures[0].reason, "closed");
    }
}
