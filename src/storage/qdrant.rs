//! Qdrant implementation of the VectorStore trait.
//!
//! Uses Qdrant's HTTP API directly through `reqwest`. Writes are sent with
//! `wait=true` so an upsert has been applied when the call returns.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::{FieldIndexKind, ScoredPoint, StorageError, StorageResult, VectorPoint, VectorStore};
use crate::config::QdrantConfig;
use crate::query::filter::Filter;

/// Qdrant HTTP API implementation of VectorStore.
#[derive(Debug, Clone)]
pub struct QdrantStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl QdrantStore {
    /// Create a store for the server at `base_url` (e.g. "http://localhost:6333").
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: std::time::Duration,
    ) -> StorageResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    /// Create a store from the Qdrant section of the configuration.
    pub fn from_config(config: &QdrantConfig) -> StorageResult<Self> {
        Self::new(&config.url, config.api_key.clone(), config.timeout())
    }

    /// Build a request with optional API key header.
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(method, &url);
        if let Some(key) = &self.api_key {
            req = req.header("api-key", key);
        }
        req
    }

    async fn send(&self, req: RequestBuilder) -> StorageResult<Response> {
        req.send()
            .await
            .map_err(|e| StorageError::HttpError(e.to_string()))
    }

    /// Turn a non-success response into a backend error.
    async fn check(resp: Response, what: &str) -> StorageResult<Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let error_text = resp.text().await.unwrap_or_default();
        Err(StorageError::BackendError(format!(
            "Failed to {} ({}): {}",
            what, status, error_text
        )))
    }

    async fn decode<T: for<'de> Deserialize<'de>>(resp: Response) -> StorageResult<T> {
        resp.json::<T>()
            .await
            .map_err(|e| StorageError::SerializationError(e.to_string()))
    }
}

#[derive(Serialize)]
struct CreateCollectionRequest {
    vectors: VectorConfig,
}

#[derive(Serialize)]
struct VectorConfig {
    size: usize,
    distance: &'static str,
}

#[derive(Serialize)]
struct CreateIndexRequest<'a> {
    field_name: &'a str,
    field_schema: &'a str,
}

#[derive(Serialize)]
struct UpsertPointsRequest {
    points: Vec<PointStruct>,
}

#[derive(Serialize)]
struct PointStruct {
    id: u64,
    vector: Vec<f32>,
    payload: Map<String, Value>,
}

#[derive(Serialize)]
struct CountRequest {
    exact: bool,
}

#[derive(Deserialize)]
struct CountResponse {
    result: CountResult,
}

#[derive(Deserialize)]
struct CountResult {
    count: usize,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<&'a Filter>,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    id: Value,
    score: f32,
    payload: Option<Map<String, Value>>,
}

fn point_id_from_json(id: &Value) -> StorageResult<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| StorageError::SerializationError(format!("unexpected point id {}", id)))
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn collection_exists(&self, name: &str) -> StorageResult<bool> {
        let resp = self
            .send(self.request(Method::GET, &format!("/collections/{}", name)))
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(resp, "check collection").await?;
        Ok(true)
    }

    async fn create_collection(&self, name: &str, dimension: usize) -> StorageResult<()> {
        info!("Creating Qdrant collection {} (dim {})", name, dimension);
        let body = CreateCollectionRequest {
            vectors: VectorConfig {
                size: dimension,
                distance: "Cosine",
            },
        };
        let resp = self
            .send(
                self.request(Method::PUT, &format!("/collections/{}", name))
                    .json(&body),
            )
            .await?;
        Self::check(resp, &format!("create collection {}", name)).await?;
        Ok(())
    }

    async fn create_field_index(
        &self,
        name: &str,
        field: &str,
        kind: FieldIndexKind,
    ) -> StorageResult<()> {
        let body = CreateIndexRequest {
            field_name: field,
            field_schema: kind.as_str(),
        };
        let resp = self
            .send(
                self.request(Method::PUT, &format!("/collections/{}/index?wait=true", name))
                    .json(&body),
            )
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            // Index might already exist, which is fine
            if !error_text.contains("already exists") {
                warn!("Failed to create index for {}: {}", field, error_text);
                return Err(StorageError::BackendError(format!(
                    "Failed to create index for {}: {}",
                    field, error_text
                )));
            }
        }
        Ok(())
    }

    async fn upsert(&self, name: &str, points: Vec<VectorPoint>) -> StorageResult<()> {
        let count = points.len();
        let body = UpsertPointsRequest {
            points: points
                .into_iter()
                .map(|p| PointStruct {
                    id: p.id,
                    vector: p.vector,
                    payload: p.payload,
                })
                .collect(),
        };
        let resp = self
            .send(
                self.request(Method::PUT, &format!("/collections/{}/points?wait=true", name))
                    .json(&body),
            )
            .await?;
        Self::check(resp, "upsert points").await?;
        debug!("Upserted {} points into {}", count, name);
        Ok(())
    }

    async fn count(&self, name: &str) -> StorageResult<usize> {
        let resp = self
            .send(
                self.request(Method::POST, &format!("/collections/{}/points/count", name))
                    .json(&CountRequest { exact: true }),
            )
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(name.to_string()));
        }
        let resp = Self::check(resp, "count points").await?;
        let body: CountResponse = Self::decode(resp).await?;
        Ok(body.result.count)
    }

    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        filter: Option<&Filter>,
        limit: usize,
    ) -> StorageResult<Vec<ScoredPoint>> {
        let body = SearchRequest {
            vector,
            limit,
            with_payload: true,
            filter: filter.filter(|f| !f.is_empty()),
        };
        let resp = self
            .send(
                self.request(Method::POST, &format!("/collections/{}/points/search", name))
                    .json(&body),
            )
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(name.to_string()));
        }
        let resp = Self::check(resp, "search").await?;
        let body: SearchResponse = Self::decode(resp).await?;

        body.result
            .into_iter()
            .map(|hit| {
                Ok(ScoredPoint {
                    id: point_id_from_json(&hit.id)?,
                    score: hit.score,
                    payload: hit.payload.unwrap_or_default(),
                })
            })
            .collect()
    }
}
