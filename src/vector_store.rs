use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{IndexError, Result};

/// A vector store point: id, embedding, and arbitrary JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: Uuid,
    pub score: f32,
    pub payload: Value,
}

#[derive(Debug, Clone, Default)]
pub struct Filter {
    /// field -> exact match value
    pub must_eq: Vec<(String, Value)>,
    /// field -> value that must NOT be present in the document's list field
    pub must_not_contain: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Filter::default()
    }

    pub fn with_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.must_eq.push((field.to_string(), value.into()));
        self
    }

    pub fn with_not_contains(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.must_not_contain.push((field.to_string(), value.into()));
        self
    }

    fn to_qdrant_json(&self) -> Value {
        let must: Vec<Value> = self
            .must_eq
            .iter()
            .map(|(field, value)| json!({ "key": field, "match": { "value": value } }))
            .collect();
        let must_not: Vec<Value> = self
            .must_not_contain
            .iter()
            .map(|(field, value)| json!({ "key": field, "match": { "value": value } }))
            .collect();
        if must.is_empty() && must_not.is_empty() {
            return json!({});
        }
        json!({ "must": must, "must_not": must_not })
    }
}

#[derive(Debug, Clone)]
pub struct ScrollPage {
    pub points: Vec<Point>,
    pub next_cursor: Option<Value>,
}

/// Backend-agnostic surface this crate needs from a vector store. Split out
/// as a trait so orchestrator/payload_index/branch_visibility/query tests can
/// run against an in-memory fake instead of a real Qdrant-compatible server.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn collection_exists(&self, name: &str) -> Result<bool>;
    async fn create_collection(&self, name: &str, dim: usize, max_segment_size_kb: u64) -> Result<()>;
    async fn delete_collection(&self, name: &str) -> Result<()>;
    async fn upsert_points(&self, name: &str, points: &[Point], wait: bool) -> Result<()>;
    async fn delete_by_filter(&self, name: &str, filter: &Filter) -> Result<()>;
    async fn scroll(&self, name: &str, filter: &Filter, limit: usize, cursor: Option<Value>) -> Result<ScrollPage>;
    async fn search(&self, name: &str, vector: &[f32], filter: &Filter, limit: usize, score_threshold: Option<f32>) -> Result<Vec<SearchHit>>;
    async fn set_payload(&self, name: &str, point_ids: &[Uuid], payload: Value) -> Result<()>;
    async fn create_payload_index(&self, name: &str, field: &str, schema: &str) -> Result<()>;
    async fn delete_payload_index(&self, name: &str, field: &str) -> Result<()>;
    async fn list_payload_indexes(&self, name: &str) -> Result<Vec<String>>;
    async fn count(&self, name: &str, filter: &Filter) -> Result<u64>;
}

const DEFAULT_RETRY_ATTEMPTS: u32 = 4;
const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// HTTP client for a Qdrant-compatible vector store. Callers are responsible
/// for keeping all chunks of one file in a single `upsert_points` batch when
/// file-level atomicity is required; this client issues whatever batch it is given.
pub struct VectorStoreClient {
    http: reqwest::Client,
    base_url: String,
}

impl VectorStoreClient {
    pub fn new(base_url: String) -> Self {
        VectorStoreClient { http: reqwest::Client::new(), base_url: base_url.trim_end_matches('/').to_string() }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send_once(&self, req: reqwest::RequestBuilder) -> Result<Value> {
        let url_for_err = self.base_url.clone();
        let resp = req.send().await.map_err(IndexError::from)?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(IndexError::RateLimited { retry_after_ms: None });
        }
        if resp.status().is_server_error() {
            return Err(IndexError::Transport {
                endpoint: url_for_err,
                source: anyhow::anyhow!("server error: {}", resp.status()),
            });
        }
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::CONFLICT {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexError::Permanent(format!("vector store returned {status}: {body}")));
        }

        resp.json::<Value>().await.or_else(|_| Ok(json!({})))
    }

    /// Rebuilds and resends the request via `build` on every retryable
    /// failure, with exponential backoff. `build` must be reusable: a
    /// `RequestBuilder` is consumed by `send`, so the closure constructs a
    /// fresh one per attempt rather than cloning an already-sent one.
    async fn send_retryable<F>(&self, mut build: F) -> Result<Value>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            match self.send_once(build()).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt + 1 < DEFAULT_RETRY_ATTEMPTS => {
                    let delay = DEFAULT_RETRY_BASE_DELAY * 2u32.pow(attempt);
                    tracing::warn!(attempt, error = %e, "retrying vector store request after backoff");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn parse_points(value: &Value) -> Vec<Point> {
        let empty = Vec::new();
        value
            .as_array()
            .unwrap_or(&empty)
            .iter()
            .filter_map(|p| {
                Some(Point {
                    id: Uuid::parse_str(p["id"].as_str()?).ok()?,
                    vector: Vec::new(),
                    payload: p["payload"].clone(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl VectorStore for VectorStoreClient {
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let resp = self.http.get(self.url(&format!("/collections/{name}"))).send().await.map_err(IndexError::from)?;
        Ok(resp.status().is_success())
    }

    async fn create_collection(&self, name: &str, dim: usize, max_segment_size_kb: u64) -> Result<()> {
        let body = json!({
            "vectors": { "size": dim, "distance": "Cosine" },
            "optimizers_config": { "max_segment_size_kb": max_segment_size_kb },
            "on_disk_payload": true,
        });
        let url = self.url(&format!("/collections/{name}"));
        self.send_retryable(|| self.http.put(&url).json(&body)).await?;
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let url = self.url(&format!("/collections/{name}"));
        self.send_retryable(|| self.http.delete(&url)).await?;
        Ok(())
    }

    /// Upserts a batch of points as a single request. Retries the whole batch
    /// on transient failure; never splits it, so file-level atomicity holds.
    async fn upsert_points(&self, name: &str, points: &[Point], wait: bool) -> Result<()> {
        let body = json!({
            "points": points.iter().map(|p| json!({
                "id": p.id,
                "vector": p.vector,
                "payload": p.payload,
            })).collect::<Vec<_>>(),
        });
        let url = self.url(&format!("/collections/{name}/points?wait={wait}"));
        self.send_retryable(|| self.http.put(&url).json(&body)).await?;
        Ok(())
    }

    async fn delete_by_filter(&self, name: &str, filter: &Filter) -> Result<()> {
        let body = json!({ "filter": filter.to_qdrant_json() });
        let url = self.url(&format!("/collections/{name}/points/delete"));
        self.send_retryable(|| self.http.post(&url).json(&body)).await?;
        Ok(())
    }

    async fn scroll(&self, name: &str, filter: &Filter, limit: usize, cursor: Option<Value>) -> Result<ScrollPage> {
        let mut body = json!({
            "filter": filter.to_qdrant_json(),
            "limit": limit,
            "with_payload": true,
            "with_vector": false,
        });
        if let Some(cursor) = &cursor {
            body["offset"] = cursor.clone();
        }
        let url = self.url(&format!("/collections/{name}/points/scroll"));
        let result = self.send_retryable(|| self.http.post(&url).json(&body)).await?;
        let points = Self::parse_points(&result["result"]["points"]);
        let next_cursor = match &result["result"]["next_page_offset"] {
            Value::Null => None,
            other => Some(other.clone()),
        };
        Ok(ScrollPage { points, next_cursor })
    }

    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        filter: &Filter,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        let mut body = json!({
            "vector": vector,
            "filter": filter.to_qdrant_json(),
            "limit": limit,
            "with_payload": true,
        });
        if let Some(threshold) = score_threshold {
            body["score_threshold"] = json!(threshold);
        }
        let url = self.url(&format!("/collections/{name}/points/search"));
        let result = self.send_retryable(|| self.http.post(&url).json(&body)).await?;
        let empty = Vec::new();
        let hits = result["result"].as_array().unwrap_or(&empty);
        Ok(hits
            .iter()
            .filter_map(|h| {
                Some(SearchHit {
                    id: Uuid::parse_str(h["id"].as_str()?).ok()?,
                    score: h["score"].as_f64()? as f32,
                    payload: h["payload"].clone(),
                })
            })
            .collect())
    }

    /// Overwrites the payload of a specific set of points (merges keys rather
    /// than replacing the whole payload document).
    async fn set_payload(&self, name: &str, point_ids: &[Uuid], payload: Value) -> Result<()> {
        let body = json!({ "payload": payload, "points": point_ids });
        let url = self.url(&format!("/collections/{name}/points/payload"));
        self.send_retryable(|| self.http.post(&url).json(&body)).await?;
        Ok(())
    }

    async fn create_payload_index(&self, name: &str, field: &str, schema: &str) -> Result<()> {
        let body = json!({ "field_name": field, "field_schema": schema });
        let url = self.url(&format!("/collections/{name}/index"));
        self.send_retryable(|| self.http.put(&url).json(&body)).await?;
        Ok(())
    }

    async fn delete_payload_index(&self, name: &str, field: &str) -> Result<()> {
        let url = self.url(&format!("/collections/{name}/index/{field}"));
        self.send_retryable(|| self.http.delete(&url)).await?;
        Ok(())
    }

    async fn list_payload_indexes(&self, name: &str) -> Result<Vec<String>> {
        let resp = self.http.get(self.url(&format!("/collections/{name}"))).send().await.map_err(IndexError::from)?;
        let info: Value = resp.json().await.map_err(IndexError::from)?;
        let schema = &info["result"]["payload_schema"];
        Ok(schema.as_object().map(|m| m.keys().cloned().collect()).unwrap_or_default())
    }

    async fn count(&self, name: &str, filter: &Filter) -> Result<u64> {
        let body = json!({ "filter": filter.to_qdrant_json(), "exact": true });
        let url = self.url(&format!("/collections/{name}/points/count"));
        let result = self.send_retryable(|| self.http.post(&url).json(&body)).await?;
        Ok(result["result"]["count"].as_u64().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_with_no_clauses_is_empty_object() {
        let f = Filter::new();
        assert_eq!(f.to_qdrant_json(), json!({}));
    }

    #[test]
    fn filter_builds_must_and_must_not() {
        let f = Filter::new().with_eq("project_id", "abcd1234").with_not_contains("hidden_branches", "main");
        let json = f.to_qdrant_json();
        assert_eq!(json["must"][0]["key"], "project_id");
        assert_eq!(json["must_not"][0]["key"], "hidden_branches");
    }
}
