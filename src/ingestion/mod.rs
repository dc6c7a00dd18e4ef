//! Ingestion pipeline module.
//!
//! This module drains a paper provider into the vector store. Records are
//! accumulated into chunks; each chunk is embedded with one call, given
//! deterministic point ids, and written with one upsert. Re-running the same
//! ingestion overwrites the same points instead of duplicating them.
//!
//! # Usage
//!
//! ```ignore
//! use paper_indexer::config::IndexerConfig;
//! use paper_indexer::ingestion::IngestionPipeline;
//! use paper_indexer::provider::{FetchRequest, SourceFetcher};
//!
//! let config = IndexerConfig::load(None)?;
//! let mut pipeline = IngestionPipeline::new(embedder, store, &config);
//!
//! let mut fetcher = SourceFetcher::from_request(&config, &request)?;
//! let stats = pipeline
//!     .run_with_progress(&mut fetcher, |stats| println!("{} upserted", stats.upserted))
//!     .await?;
//! ```
//!
//! The pipeline:
//! - Creates the collection and its payload indexes on first use
//! - Pulls the next record only after the current chunk has been written
//! - Stops at the first embedding or storage failure; earlier chunks stay written
//! - Writes what it already pulled before reporting a provider failure

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::IndexerConfig;
use crate::embedding::{check_batch, DocumentInput, EmbeddingError, EmbeddingProvider};
use crate::identity::point_id;
use crate::models::PaperRecord;
use crate::provider::{PaperProvider, ProviderError};
use crate::storage::{FieldIndexKind, StorageError, VectorPoint, VectorStore};

/// Payload indexes created with the collection.
pub const PAYLOAD_INDEXES: &[(&str, FieldIndexKind)] = &[
    ("paper_id", FieldIndexKind::Keyword),
    ("source", FieldIndexKind::Keyword),
    ("authors", FieldIndexKind::Text),
    ("title", FieldIndexKind::Text),
    ("abstract", FieldIndexKind::Text),
    ("update_date", FieldIndexKind::Datetime),
    ("categories", FieldIndexKind::Keyword),
];

/// Errors that can occur during ingestion.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Provider operation failed
    #[error("Provider error: {0}")]
    ProviderError(#[from] ProviderError),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    EmbeddingError(#[from] EmbeddingError),

    /// Storage operation failed
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

/// Result type for ingestion operations.
pub type IngestionResult<T> = Result<T, IngestionError>;

/// Statistics from an ingestion run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestionStats {
    /// Records pulled from the provider
    pub fetched: usize,

    /// Records written to the store
    pub upserted: usize,

    /// Upsert calls made
    pub batches: usize,
}

impl IngestionStats {
    /// Create new empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one record pulled from the provider.
    pub fn record_fetched(&mut self) {
        self.fetched += 1;
    }

    /// Record a successful upsert of `size` points.
    pub fn record_batch(&mut self, size: usize) {
        self.batches += 1;
        self.upserted += size;
    }
}

/// Ingestion pipeline coordinator.
pub struct IngestionPipeline<E, S>
where
    E: EmbeddingProvider,
    S: VectorStore,
{
    /// Embedding provider for document embeddings
    embedding_provider: E,

    /// Destination store
    store: S,

    /// Destination collection
    collection: String,

    /// Records per embed-and-upsert call
    chunk_size: usize,

    /// Set once the collection is known to exist
    collection_ready: bool,
}

impl<E, S> IngestionPipeline<E, S>
where
    E: EmbeddingProvider,
    S: VectorStore,
{
    /// Create a pipeline writing to the configured collection.
    pub fn new(embedding_provider: E, store: S, config: &IndexerConfig) -> Self {
        Self {
            embedding_provider,
            store,
            collection: config.collection_name.clone(),
            chunk_size: config.chunk_size.max(1),
            collection_ready: false,
        }
    }

    /// Override the chunk size (values below 1 become 1).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Destination collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create the collection and its payload indexes unless it already exists.
    ///
    /// Safe to call any number of times.
    pub async fn ensure_collection(&mut self) -> IngestionResult<()> {
        if self.collection_ready {
            return Ok(());
        }

        if self.store.collection_exists(&self.collection).await? {
            debug!("Collection {} already exists", self.collection);
        } else {
            let dimension = self.embedding_provider.dimension();
            info!(
                "Creating collection {} ({} dims, model {})",
                self.collection,
                dimension,
                self.embedding_provider.model_name()
            );
            self.store.create_collection(&self.collection, dimension).await?;
            for (field, kind) in PAYLOAD_INDEXES {
                self.store
                    .create_field_index(&self.collection, field, *kind)
                    .await?;
            }
        }

        self.collection_ready = true;
        Ok(())
    }

    /// Drain `provider` into the store.
    pub async fn run<P>(&mut self, provider: &mut P) -> IngestionResult<IngestionStats>
    where
        P: PaperProvider + ?Sized,
    {
        self.run_with_progress(provider, |_| {}).await
    }

    /// Drain `provider` into the store, calling `on_batch` after every upsert.
    ///
    /// # Errors
    /// - Embedding or storage failures abort immediately; the current chunk is
    ///   lost, earlier chunks remain written
    /// - A provider failure first writes the records already pulled, then is
    ///   returned
    pub async fn run_with_progress<P, F>(
        &mut self,
        provider: &mut P,
        mut on_batch: F,
    ) -> IngestionResult<IngestionStats>
    where
        P: PaperProvider + ?Sized,
        F: FnMut(&IngestionStats),
    {
        self.ensure_collection().await?;

        let mut stats = IngestionStats::new();
        let mut batch: Vec<PaperRecord> = Vec::with_capacity(self.chunk_size);

        loop {
            match provider.next_paper().await {
                Ok(Some(paper)) => {
                    stats.record_fetched();
                    batch.push(paper);
                    if batch.len() >= self.chunk_size {
                        self.flush(&mut batch, &mut stats).await?;
                        on_batch(&stats);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(
                        "{} failed after {} records: {}",
                        provider.name(),
                        stats.fetched,
                        e
                    );
                    if !batch.is_empty() {
                        self.flush(&mut batch, &mut stats).await?;
                        on_batch(&stats);
                    }
                    return Err(e.into());
                }
            }
        }

        if !batch.is_empty() {
            self.flush(&mut batch, &mut stats).await?;
            on_batch(&stats);
        }

        info!(
            "Ingested {} papers from {} into {} ({} batches)",
            stats.upserted,
            provider.name(),
            self.collection,
            stats.batches
        );
        Ok(stats)
    }

    /// Embed and upsert the pending records, leaving `batch` empty on success.
    async fn flush(
        &self,
        batch: &mut Vec<PaperRecord>,
        stats: &mut IngestionStats,
    ) -> IngestionResult<()> {
        let vectors = {
            let docs: Vec<DocumentInput<'_>> =
                batch.iter().map(DocumentInput::from_paper).collect();
            self.embedding_provider.embed_documents(&docs).await?
        };
        check_batch(&vectors, batch.len(), self.embedding_provider.dimension())?;

        let size = batch.len();
        let points: Vec<VectorPoint> = batch
            .drain(..)
            .zip(vectors)
            .map(|(paper, vector)| VectorPoint {
                id: point_id(&paper.paper_id),
                vector,
                payload: paper.to_payload(),
            })
            .collect();

        self.store.upsert(&self.collection, points).await?;
        stats.record_batch(size);
        debug!("Upserted batch {} ({} papers)", stats.batches, size);
        Ok(())
    }
}
