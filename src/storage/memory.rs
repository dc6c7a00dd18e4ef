//! In-memory vector store.
//!
//! Brute-force cosine search over every point in a collection. Intended for
//! tests and small dry runs; nothing is persisted.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use super::{FieldIndexKind, ScoredPoint, StorageError, StorageResult, VectorPoint, VectorStore};
use crate::query::cosine_similarity;
use crate::query::filter::Filter;

#[derive(Debug, Default)]
struct Collection {
    dimension: usize,
    points: BTreeMap<u64, (Vec<f32>, Map<String, Value>)>,
    indexes: Vec<(String, FieldIndexKind)>,
}

/// Thread-safe in-memory store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    collections: Arc<Mutex<HashMap<String, Collection>>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload indexes declared on a collection, in creation order.
    pub fn field_indexes(&self, name: &str) -> StorageResult<Vec<(String, FieldIndexKind)>> {
        let collections = self.lock()?;
        collections
            .get(name)
            .map(|c| c.indexes.clone())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    /// Stored payload of one point.
    pub fn payload(&self, name: &str, id: u64) -> StorageResult<Option<Map<String, Value>>> {
        let collections = self.lock()?;
        let collection = collections
            .get(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        Ok(collection.points.get(&id).map(|(_, payload)| payload.clone()))
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, HashMap<String, Collection>>> {
        self.collections
            .lock()
            .map_err(|e| StorageError::BackendError(format!("store lock poisoned: {}", e)))
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn collection_exists(&self, name: &str) -> StorageResult<bool> {
        Ok(self.lock()?.contains_key(name))
    }

    async fn create_collection(&self, name: &str, dimension: usize) -> StorageResult<()> {
        let mut collections = self.lock()?;
        collections.entry(name.to_string()).or_insert_with(|| Collection {
            dimension,
            ..Collection::default()
        });
        Ok(())
    }

    async fn create_field_index(
        &self,
        name: &str,
        field: &str,
        kind: FieldIndexKind,
    ) -> StorageResult<()> {
        let mut collections = self.lock()?;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        if !collection.indexes.iter().any(|(f, _)| f == field) {
            collection.indexes.push((field.to_string(), kind));
        }
        Ok(())
    }

    async fn upsert(&self, name: &str, points: Vec<VectorPoint>) -> StorageResult<()> {
        let mut collections = self.lock()?;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;

        // Validate the whole batch before touching anything.
        if let Some(bad) = points.iter().find(|p| p.vector.len() != collection.dimension) {
            return Err(StorageError::DimensionMismatch {
                expected: collection.dimension,
                actual: bad.vector.len(),
            });
        }

        debug!("Upserting {} points into {}", points.len(), name);
        for point in points {
            collection.points.insert(point.id, (point.vector, point.payload));
        }
        Ok(())
    }

    async fn count(&self, name: &str) -> StorageResult<usize> {
        let collections = self.lock()?;
        collections
            .get(name)
            .map(|c| c.points.len())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        filter: Option<&Filter>,
        limit: usize,
    ) -> StorageResult<Vec<ScoredPoint>> {
        let collections = self.lock()?;
        let collection = collections
            .get(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        if vector.len() != collection.dimension {
            return Err(StorageError::DimensionMismatch {
                expected: collection.dimension,
                actual: vector.len(),
            });
        }

        let mut hits: Vec<ScoredPoint> = collection
            .points
            .iter()
            .filter(|(_, (_, payload))| filter.map_or(true, |f| f.matches(payload)))
            .map(|(id, (stored, payload))| ScoredPoint {
                id: *id,
                score: cosine_similarity(vector, stored),
                payload: payload.clone(),
            })
            .collect();

        // Highest score first; ties broken by id for a stable order.
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::filter::Condition;
    use serde_json::json;

    fn point(id: u64, vector: Vec<f32>, source: &str) -> VectorPoint {
        let payload = match json!({"paper_id": id.to_string(), "source": source}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        VectorPoint {
            id,
            vector,
            payload,
        }
    }

    async fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.create_collection("papers", 2).await.unwrap();
        store
            .upsert(
                "papers",
                vec![
                    point(1, vec![1.0, 0.0], "arxiv"),
                    point(2, vec![0.7, 0.7], "biorxiv"),
                    point(3, vec![0.0, 1.0], "arxiv"),
                ],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_id() {
        let store = seeded_store().await;
        store
            .upsert("papers", vec![point(1, vec![0.0, 1.0], "medrxiv")])
            .await
            .unwrap();

        assert_eq!(store.count("papers").await.unwrap(), 3);
        let payload = store.payload("papers", 1).unwrap().unwrap();
        assert_eq!(payload["source"], "medrxiv");
    }

    #[tokio::test]
    async fn test_search_orders_by_score_and_filters() {
        let store = seeded_store().await;

        let hits = store.search("papers", &[1.0, 0.1], None, 2).await.unwrap();
        let ids: Vec<u64> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![1, 2]);

        let filter = Filter::new(vec![Condition::exact("source", "arxiv")]);
        let hits = store
            .search("papers", &[0.7, 0.7], Some(&filter), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.payload["source"] == "arxiv"));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejects_whole_batch() {
        let store = seeded_store().await;
        let result = store
            .upsert(
                "papers",
                vec![point(10, vec![1.0, 0.0], "arxiv"), point(11, vec![1.0], "arxiv")],
            )
            .await;

        assert!(matches!(
            result,
            Err(StorageError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert_eq!(store.count("papers").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_missing_collection() {
        let store = InMemoryStore::new();
        assert!(!store.collection_exists("papers").await.unwrap());
        assert!(matches!(
            store.count("papers").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_collection_is_idempotent() {
        let store = seeded_store().await;
        store.create_collection("papers", 2).await.unwrap();
        assert_eq!(store.count("papers").await.unwrap(), 3);
    }
}
