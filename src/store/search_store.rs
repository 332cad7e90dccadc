//! The search store collaborator: a bulk-indexed search engine (the kind of
//! thing Elasticsearch/OpenSearch is) addressed only through index names and
//! a bulk NDJSON API.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::core::error::SearchStoreError;
use crate::fields::DocumentField;
use crate::index::names::ArcStatus;
use crate::index::ops::BulkOp;

/// The outcome of a single bulk request: how many items succeeded, and the
/// per-item errors for the ones that didn't (Elasticsearch's bulk API's
/// `BulkOpException`-equivalent reporting).
#[derive(Debug, Clone, Default)]
pub struct BulkResponse {
    /// true if the transport call itself succeeded (errors below are
    /// item-level, not a transport failure)
    pub took_ms: u64,
    /// whether any item in the batch reported an error
    pub has_errors: bool,
    /// item-level errors, one entry per failed item
    pub errors: Vec<BulkItemError>,
}

/// One item-level failure from a bulk request.
#[derive(Debug, Clone)]
pub struct BulkItemError {
    /// the index the failing item targeted
    pub index: String,
    /// the document id, if the op specified one
    pub doc_id: Option<String>,
    /// the store's reported error reason
    pub reason: String,
}

#[derive(Debug, Deserialize)]
struct RawBulkResponse {
    took: u64,
    errors: bool,
    items: Vec<std::collections::HashMap<String, RawBulkItem>>,
}

#[derive(Debug, Deserialize)]
struct RawBulkItem {
    #[serde(rename = "_index")]
    index: String,
    #[serde(rename = "_id")]
    id: Option<String>,
    error: Option<RawBulkError>,
}

#[derive(Debug, Deserialize)]
struct RawBulkError {
    reason: String,
}

/// An aggregation bucket: a field value and its document count, as produced
/// by `field_type_aggregation`/`versions_aggregation`.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket<T> {
    /// the bucket's key
    pub key: T,
    /// how many documents fell into it
    pub doc_count: i64,
}

/// The search store operations the rest of the engine needs: index
/// lifecycle management, bulk writes, and the aggregations that back
/// `get_versions`/`get_data_fields`/`get_parsed_fields`.
#[async_trait::async_trait]
pub trait SearchStore: Send + Sync {
    /// Install (or update) the index template that new `data-*` indices pick up.
    async fn ensure_template(&self) -> Result<(), SearchStoreError>;

    /// Create `index` if it doesn't already exist.
    async fn ensure_index_exists(&self, index: &str) -> Result<(), SearchStoreError>;

    /// Toggle an index into (or out of) "bulk sync" mode: no refresh, no
    /// replicas while `enable` is true, restored to defaults when false.
    async fn set_sync_settings(&self, index: &str, enable: bool) -> Result<(), SearchStoreError>;

    /// Force a refresh so just-written documents become searchable immediately.
    async fn refresh(&self, index: &str) -> Result<(), SearchStoreError>;

    /// Submit one NDJSON bulk request.
    async fn bulk(&self, ops: &[BulkOp]) -> Result<BulkResponse, SearchStoreError>;

    /// The maximum value of `field` (one of `version`/`next`) across every
    /// `data-<name>-*` index, used to compute the search store's watermark
    /// for a database during `sync`.
    async fn max_date_field(
        &self,
        name: &str,
        field: DocumentField,
    ) -> Result<Option<i64>, SearchStoreError>;

    /// Every distinct `[version, next)` boundary across a database's
    /// indices, ascending - the composite aggregation backing `get_versions`.
    async fn versions_aggregation(&self, name: &str) -> Result<Vec<i64>, SearchStoreError>;

    /// Distinct field-path/type-tag pairs under `field` (`data_types` or
    /// `parsed_types`) and how many documents carry each, backing
    /// `get_data_fields`/`get_parsed_fields`.
    async fn field_type_aggregation(
        &self,
        name: &str,
        field: DocumentField,
    ) -> Result<Vec<Bucket<String>>, SearchStoreError>;

    /// Delete `index` if it holds zero documents - used after a rollback
    /// empties an archive.
    async fn delete_index_if_empty(&self, index: &str) -> Result<bool, SearchStoreError>;

    /// The archive-rotation state as it actually stands in the store right
    /// now: the highest-numbered `{arc_base}-N` index and how many documents
    /// it holds. Recomputed by query rather than cached, since the planner's
    /// caller may be a fresh facade handle with no memory of previous runs.
    async fn current_arc_status(&self, arc_base: &str) -> Result<ArcStatus, SearchStoreError>;
}

/// Real search store, backed by `reqwest` against an Elasticsearch/OpenSearch-
/// compatible HTTP API.
pub struct ElasticsearchStore {
    client: reqwest::Client,
    base_url: String,
}

impl ElasticsearchStore {
    /// Build a store client pointed at `base_url` (e.g. `http://localhost:9200`),
    /// with the given per-request timeout.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, SearchStoreError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SearchStoreError::Transport(e.to_string()))?;
        Ok(ElasticsearchStore {
            client,
            base_url: base_url.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

#[async_trait::async_trait]
impl SearchStore for ElasticsearchStore {
    async fn ensure_template(&self) -> Result<(), SearchStoreError> {
        let template = crate::index::template::data_index_template();
        let response = self
            .client
            .put(self.url("_index_template/data"))
            .json(&template)
            .send()
            .await
            .map_err(|e| SearchStoreError::Transport(e.to_string()))?;
        check_response(response).await?;
        Ok(())
    }

    async fn ensure_index_exists(&self, index: &str) -> Result<(), SearchStoreError> {
        let exists = self
            .client
            .head(self.url(index))
            .send()
            .await
            .map_err(|e| SearchStoreError::Transport(e.to_string()))?
            .status()
            .is_success();
        if exists {
            return Ok(());
        }
        let response = self
            .client
            .put(self.url(index))
            .send()
            .await
            .map_err(|e| SearchStoreError::Transport(e.to_string()))?;
        // a 400 here usually means another writer created the index first;
        // treat that as success rather than raising a spurious error
        if response.status().as_u16() == 400 {
            return Ok(());
        }
        check_response(response).await?;
        Ok(())
    }

    async fn set_sync_settings(&self, index: &str, enable: bool) -> Result<(), SearchStoreError> {
        let settings = if enable {
            serde_json::json!({ "index": { "refresh_interval": "-1", "number_of_replicas": 0 } })
        } else {
            serde_json::json!({ "index": { "refresh_interval": null, "number_of_replicas": null } })
        };
        let response = self
            .client
            .put(self.url(&format!("{}/_settings", index)))
            .json(&settings)
            .send()
            .await
            .map_err(|e| SearchStoreError::Transport(e.to_string()))?;
        check_response(response).await?;
        Ok(())
    }

    async fn refresh(&self, index: &str) -> Result<(), SearchStoreError> {
        let response = self
            .client
            .post(self.url(&format!("{}/_refresh", index)))
            .send()
            .await
            .map_err(|e| SearchStoreError::Transport(e.to_string()))?;
        check_response(response).await?;
        Ok(())
    }

    async fn bulk(&self, ops: &[BulkOp]) -> Result<BulkResponse, SearchStoreError> {
        let body = ops
            .iter()
            .map(|op| op.serialize())
            .collect::<Vec<_>>()
            .join("\n")
            + "\n";

        let response = self
            .client
            .post(self.url("_bulk"))
            .header("content-type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| SearchStoreError::Transport(e.to_string()))?;
        let response = check_response(response).await?;
        let raw: RawBulkResponse = response
            .json()
            .await
            .map_err(|e| SearchStoreError::Transport(e.to_string()))?;

        let mut errors = Vec::new();
        for item in &raw.items {
            for entry in item.values() {
                if let Some(error) = &entry.error {
                    errors.push(BulkItemError {
                        index: entry.index.clone(),
                        doc_id: entry.id.clone(),
                        reason: error.reason.clone(),
                    });
                }
            }
        }

        Ok(BulkResponse {
            took_ms: raw.took,
            has_errors: raw.errors,
            errors,
        })
    }

    async fn max_date_field(
        &self,
        name: &str,
        field: DocumentField,
    ) -> Result<Option<i64>, SearchStoreError> {
        let wildcard = format!("data-{}-*", name);
        let body = serde_json::json!({
            "size": 0,
            "aggs": { "max_field": { "max": { "field": field.as_str() } } }
        });
        let response = self
            .client
            .post(self.url(&format!("{}/_search", wildcard)))
            .json(&body)
            .send()
            .await
            .map_err(|e| SearchStoreError::Transport(e.to_string()))?;
        let response = check_response(response).await?;
        let json: Json = response
            .json()
            .await
            .map_err(|e| SearchStoreError::Transport(e.to_string()))?;
        Ok(json
            .pointer("/aggregations/max_field/value")
            .and_then(|v| v.as_f64())
            .map(|v| v as i64))
    }

    async fn versions_aggregation(&self, name: &str) -> Result<Vec<i64>, SearchStoreError> {
        let wildcard = format!("data-{}-*", name);
        let body = serde_json::json!({
            "size": 0,
            "aggs": {
                "versions": {
                    "composite": {
                        "size": 1000,
                        "sources": [{ "version": { "terms": { "field": "version" } } }]
                    }
                }
            }
        });
        let response = self
            .client
            .post(self.url(&format!("{}/_search", wildcard)))
            .json(&body)
            .send()
            .await
            .map_err(|e| SearchStoreError::Transport(e.to_string()))?;
        let response = check_response(response).await?;
        let json: Json = response
            .json()
            .await
            .map_err(|e| SearchStoreError::Transport(e.to_string()))?;
        let mut versions: Vec<i64> = json
            .pointer("/aggregations/versions/buckets")
            .and_then(|b| b.as_array())
            .into_iter()
            .flatten()
            .filter_map(|bucket| bucket.pointer("/key/version").and_then(|v| v.as_i64()))
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    async fn field_type_aggregation(
        &self,
        name: &str,
        field: DocumentField,
    ) -> Result<Vec<Bucket<String>>, SearchStoreError> {
        let wildcard = format!("data-{}-*", name);
        let body = serde_json::json!({
            "size": 0,
            "aggs": {
                "fields": {
                    "terms": { "field": field.as_str(), "size": 10000 }
                }
            }
        });
        let response = self
            .client
            .post(self.url(&format!("{}/_search", wildcard)))
            .json(&body)
            .send()
            .await
            .map_err(|e| SearchStoreError::Transport(e.to_string()))?;
        let response = check_response(response).await?;
        let json: Json = response
            .json()
            .await
            .map_err(|e| SearchStoreError::Transport(e.to_string()))?;
        let buckets = json
            .pointer("/aggregations/fields/buckets")
            .and_then(|b| b.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(buckets
            .into_iter()
            .filter_map(|bucket| {
                let key = bucket.get("key")?.as_str()?.to_string();
                let doc_count = bucket.get("doc_count")?.as_i64()?;
                Some(Bucket { key, doc_count })
            })
            .collect())
    }

    async fn delete_index_if_empty(&self, index: &str) -> Result<bool, SearchStoreError> {
        let body = serde_json::json!({ "query": { "match_all": {} } });
        let response = self
            .client
            .post(self.url(&format!("{}/_count", index)))
            .json(&body)
            .send()
            .await
            .map_err(|e| SearchStoreError::Transport(e.to_string()))?;
        let response = check_response(response).await?;
        let json: Json = response
            .json()
            .await
            .map_err(|e| SearchStoreError::Transport(e.to_string()))?;
        let count = json.get("count").and_then(|c| c.as_i64()).unwrap_or(1);
        if count != 0 {
            return Ok(false);
        }
        let response = self
            .client
            .delete(self.url(index))
            .send()
            .await
            .map_err(|e| SearchStoreError::Transport(e.to_string()))?;
        check_response(response).await?;
        Ok(true)
    }

    async fn current_arc_status(&self, arc_base: &str) -> Result<ArcStatus, SearchStoreError> {
        let response = self
            .client
            .get(self.url(&format!("_cat/indices/{}-*?format=json&h=index,docs.count", arc_base)))
            .send()
            .await
            .map_err(|e| SearchStoreError::Transport(e.to_string()))?;
        // a missing-index 404 just means no archives have been created yet
        if response.status().as_u16() == 404 {
            return Ok(ArcStatus::default());
        }
        let response = check_response(response).await?;
        let rows: Vec<Json> = response
            .json()
            .await
            .map_err(|e| SearchStoreError::Transport(e.to_string()))?;

        let prefix = format!("{}-", arc_base);
        let highest = rows
            .iter()
            .filter_map(|row| {
                let index = row.get("index")?.as_str()?;
                let suffix = index.strip_prefix(&prefix)?;
                let arc_index: u32 = suffix.parse().ok()?;
                let count = row
                    .get("docs.count")
                    .and_then(|v| v.as_str().and_then(|s| s.parse::<u64>().ok()).or_else(|| v.as_u64()))
                    .unwrap_or(0);
                Some((arc_index, count))
            })
            .max_by_key(|(arc_index, _)| *arc_index);

        Ok(match highest {
            Some((index, count)) => ArcStatus { index, count },
            None => ArcStatus::default(),
        })
    }
}

async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, SearchStoreError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(SearchStoreError::Response { status, body })
    }
}

/// In-memory fake [`SearchStore`], indexing [`BulkOp`]s into a map keyed by
/// `(index, doc_id)`. Used by facade tests so `sync`'s behavior can be
/// verified without a live search engine.
#[derive(Default)]
pub struct InMemorySearchStore {
    indices: parking_lot::Mutex<std::collections::BTreeMap<String, std::collections::BTreeMap<String, Json>>>,
    next_auto_id: parking_lot::Mutex<u64>,
}

impl InMemorySearchStore {
    /// An empty store with no indices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every document currently stored in `index`, for assertions in tests.
    pub fn documents(&self, index: &str) -> Vec<Json> {
        self.indices
            .lock()
            .get(index)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every index name currently known to the store, for assertions in tests.
    pub fn index_names(&self) -> Vec<String> {
        self.indices.lock().keys().cloned().collect()
    }
}

#[async_trait::async_trait]
impl SearchStore for InMemorySearchStore {
    async fn ensure_template(&self) -> Result<(), SearchStoreError> {
        Ok(())
    }

    async fn ensure_index_exists(&self, index: &str) -> Result<(), SearchStoreError> {
        self.indices.lock().entry(index.to_string()).or_default();
        Ok(())
    }

    async fn set_sync_settings(&self, _index: &str, _enable: bool) -> Result<(), SearchStoreError> {
        Ok(())
    }

    async fn refresh(&self, _index: &str) -> Result<(), SearchStoreError> {
        Ok(())
    }

    async fn bulk(&self, ops: &[BulkOp]) -> Result<BulkResponse, SearchStoreError> {
        let mut indices = self.indices.lock();
        let mut next_auto_id = self.next_auto_id.lock();
        for op in ops {
            let index = indices.entry(op.index().to_string()).or_default();
            match op {
                BulkOp::Index { doc_id, document, .. } => {
                    let id = doc_id.clone().unwrap_or_else(|| {
                        *next_auto_id += 1;
                        next_auto_id.to_string()
                    });
                    index.insert(id, document.clone());
                }
                BulkOp::Delete { doc_id, .. } => {
                    index.remove(doc_id);
                }
            }
        }
        Ok(BulkResponse {
            took_ms: 0,
            has_errors: false,
            errors: Vec::new(),
        })
    }

    async fn max_date_field(
        &self,
        name: &str,
        field: DocumentField,
    ) -> Result<Option<i64>, SearchStoreError> {
        let prefix = format!("data-{}-", name);
        let indices = self.indices.lock();
        Ok(indices
            .iter()
            .filter(|(index, _)| index.starts_with(&prefix))
            .flat_map(|(_, docs)| docs.values())
            .filter_map(|doc| doc.get(field.as_str()).and_then(|v| v.as_i64()))
            .max())
    }

    async fn versions_aggregation(&self, name: &str) -> Result<Vec<i64>, SearchStoreError> {
        let prefix = format!("data-{}-", name);
        let indices = self.indices.lock();
        let mut versions: Vec<i64> = indices
            .iter()
            .filter(|(index, _)| index.starts_with(&prefix))
            .flat_map(|(_, docs)| docs.values())
            .filter_map(|doc| doc.get("version").and_then(|v| v.as_i64()))
            .collect();
        versions.sort_unstable();
        versions.dedup();
        Ok(versions)
    }

    async fn field_type_aggregation(
        &self,
        name: &str,
        field: DocumentField,
    ) -> Result<Vec<Bucket<String>>, SearchStoreError> {
        let prefix = format!("data-{}-", name);
        let indices = self.indices.lock();
        let mut counts: std::collections::BTreeMap<String, i64> = std::collections::BTreeMap::new();
        for (_, docs) in indices.iter().filter(|(index, _)| index.starts_with(&prefix)) {
            for doc in docs.values() {
                if let Some(values) = doc.get(field.as_str()).and_then(|v| v.as_array()) {
                    for value in values {
                        if let Some(key) = value.as_str() {
                            *counts.entry(key.to_string()).or_insert(0) += 1;
                        }
                    }
                }
            }
        }
        Ok(counts
            .into_iter()
            .map(|(key, doc_count)| Bucket { key, doc_count })
            .collect())
    }

    async fn delete_index_if_empty(&self, index: &str) -> Result<bool, SearchStoreError> {
        let mut indices = self.indices.lock();
        if indices.get(index).map(|d| d.is_empty()).unwrap_or(false) {
            indices.remove(index);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn current_arc_status(&self, arc_base: &str) -> Result<ArcStatus, SearchStoreError> {
        let prefix = format!("{}-", arc_base);
        let indices = self.indices.lock();
        let highest = indices
            .iter()
            .filter_map(|(index, docs)| {
                let suffix = index.strip_prefix(&prefix)?;
                let arc_index: u32 = suffix.parse().ok()?;
                Some((arc_index, docs.len() as u64))
            })
            .max_by_key(|(arc_index, _)| *arc_index);

        Ok(match highest {
            Some((index, count)) => ArcStatus { index, count },
            None => ArcStatus::default(),
        })
    }
}

/// Shared handle type passed around the facade: cheap to clone, one per process.
pub type SharedSearchStore = Arc<dyn SearchStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ops::BulkOp;

    #[tokio::test]
    async fn bulk_index_then_delete_roundtrips() {
        let store = InMemorySearchStore::new();
        store.ensure_index_exists("data-demo-latest").await.unwrap();
        store
            .bulk(&[BulkOp::Index {
                index: "data-demo-latest".to_string(),
                doc_id: Some("r1".to_string()),
                document: serde_json::json!({"version": 1, "id": "r1"}),
            }])
            .await
            .unwrap();
        assert_eq!(store.documents("data-demo-latest").len(), 1);

        store
            .bulk(&[BulkOp::Delete {
                index: "data-demo-latest".to_string(),
                doc_id: "r1".to_string(),
            }])
            .await
            .unwrap();
        assert_eq!(store.documents("data-demo-latest").len(), 0);
    }

    #[tokio::test]
    async fn max_date_field_scans_every_matching_index() {
        let store = InMemorySearchStore::new();
        store
            .bulk(&[
                BulkOp::Index {
                    index: "data-demo-latest".to_string(),
                    doc_id: Some("r1".to_string()),
                    document: serde_json::json!({"version": 5}),
                },
                BulkOp::Index {
                    index: "data-demo-arc-0".to_string(),
                    doc_id: None,
                    document: serde_json::json!({"version": 9}),
                },
            ])
            .await
            .unwrap();
        let max = store
            .max_date_field("demo", DocumentField::Version)
            .await
            .unwrap();
        assert_eq!(max, Some(9));
    }

    #[tokio::test]
    async fn delete_index_if_empty_only_removes_empty_indices() {
        let store = InMemorySearchStore::new();
        store.ensure_index_exists("data-demo-arc-0").await.unwrap();
        assert!(store.delete_index_if_empty("data-demo-arc-0").await.unwrap());
        assert!(!store.index_names().contains(&"data-demo-arc-0".to_string()));
    }

    #[tokio::test]
    async fn current_arc_status_finds_the_highest_numbered_archive() {
        let store = InMemorySearchStore::new();
        store
            .bulk(&[
                BulkOp::Index {
                    index: "data-demo-arc-0".to_string(),
                    doc_id: Some("a".to_string()),
                    document: serde_json::json!({}),
                },
                BulkOp::Index {
                    index: "data-demo-arc-1".to_string(),
                    doc_id: Some("b".to_string()),
                    document: serde_json::json!({}),
                },
                BulkOp::Index {
                    index: "data-demo-arc-1".to_string(),
                    doc_id: Some("c".to_string()),
                    document: serde_json::json!({}),
                },
            ])
            .await
            .unwrap();

        let status = store.current_arc_status("data-demo-arc").await.unwrap();
        assert_eq!(status.index, 1);
        assert_eq!(status.count, 2);
    }

    #[tokio::test]
    async fn current_arc_status_defaults_when_no_archives_exist() {
        let store = InMemorySearchStore::new();
        let status = store.current_arc_status("data-demo-arc").await.unwrap();
        assert_eq!(status, ArcStatus::default());
    }
}
