//! Vector store abstraction and implementations.
//!
//! This module defines the interface for persisting and retrieving paper
//! vectors with their payloads. The abstraction allows for different backends
//! while keeping ingestion and search code unchanged:
//!
//! - [`qdrant::QdrantStore`] talks to a Qdrant server over its REST API
//! - [`memory::InMemoryStore`] is a brute-force store for tests and dry runs

pub mod memory;
pub mod qdrant;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::query::filter::Filter;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Could not reach the backend
    #[error("Storage request failed: {0}")]
    HttpError(String),

    /// The backend rejected the operation
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Data serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Collection not found
    #[error("Collection not found: {0}")]
    NotFound(String),

    /// A vector did not match the collection's dimension
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Collection dimension
        expected: usize,
        /// Offending vector length
        actual: usize,
    },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Payload index types used by the paper collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldIndexKind {
    /// Exact-match index
    Keyword,
    /// Tokenized full-text index
    Text,
    /// Datetime index for range filters
    Datetime,
}

impl FieldIndexKind {
    /// Schema name understood by the backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldIndexKind::Keyword => "keyword",
            FieldIndexKind::Text => "text",
            FieldIndexKind::Datetime => "datetime",
        }
    }
}

/// A point to write: id, vector and payload.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    /// Point id (below 2^63 - 1)
    pub id: u64,

    /// Embedding vector
    pub vector: Vec<f32>,

    /// JSON payload stored next to the vector
    pub payload: Map<String, Value>,
}

/// A point returned by a similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    /// Point id
    pub id: u64,

    /// Similarity score (higher is more similar)
    pub score: f32,

    /// Stored payload
    pub payload: Map<String, Value>,
}

/// Trait for vector store backends.
///
/// Collections use cosine similarity. Upserting an existing id replaces the
/// point; nothing in this system deletes points.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Whether a collection with this name exists.
    async fn collection_exists(&self, name: &str) -> StorageResult<bool>;

    /// Create a cosine-distance collection for vectors of `dimension` floats.
    async fn create_collection(&self, name: &str, dimension: usize) -> StorageResult<()>;

    /// Create a payload index on `field`.
    async fn create_field_index(
        &self,
        name: &str,
        field: &str,
        kind: FieldIndexKind,
    ) -> StorageResult<()>;

    /// Insert or replace points by id. All points land together or the call fails.
    async fn upsert(&self, name: &str, points: Vec<VectorPoint>) -> StorageResult<()>;

    /// Number of points in the collection.
    async fn count(&self, name: &str) -> StorageResult<usize>;

    /// Top-`limit` points by similarity to `vector`, restricted by `filter`.
    ///
    /// Results are ordered by descending score.
    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        filter: Option<&Filter>,
        limit: usize,
    ) -> StorageResult<Vec<ScoredPoint>>;
}
