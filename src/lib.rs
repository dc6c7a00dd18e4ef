//! Paper Indexer - ingest scholarly paper metadata into a vector index and query it.
//!
//! This library pulls paper metadata from heterogeneous sources, normalizes it into a
//! single canonical record, embeds each record, and upserts it into a vector store
//! under a deterministic point id so that ingestion can be re-run safely.
//!
//! # Architecture
//!
//! - **models**: Canonical data structures (PaperRecord, PaperSource, SearchResult, etc.)
//! - **http**: Retrying HTTP client shared by every network-backed source
//! - **provider**: Source fetchers (arXiv snapshot, bioRxiv/medRxiv cursor API,
//!   ChemRxiv offset API)
//! - **identity**: Natural key to vector-store point id mapping
//! - **embedding**: Document/query embedding abstraction and the fastembed backend
//! - **storage**: Vector store abstraction with Qdrant and in-memory backends
//! - **ingestion**: Batch embed-and-upsert pipeline
//! - **query**: Filtered similarity search
//! - **config**: Process-wide configuration
//!
//! # Workflow
//!
//! ## Ingestion
//!
//! 1. A source fetcher yields normalized `PaperRecord`s one at a time
//! 2. The pipeline accumulates them into chunks of 100
//! 3. Each chunk is embedded in one call (document mode)
//! 4. Each record gets a stable point id derived from its natural key
//! 5. The chunk is upserted into the collection in one store call
//!
//! ## Search
//!
//! 1. Free text is embedded in query mode
//! 2. Supplied filters are combined into one conjunctive filter
//! 3. One similarity search is issued; the store's ranking is returned as is
//!
//! # Example
//!
//! ```ignore
//! use paper_indexer::{
//!     config::IndexerConfig,
//!     embedding::fastembed::FastEmbedProvider,
//!     ingestion::IngestionPipeline,
//!     provider::{cursor::CursorPagedFetcher, PreprintServer},
//!     storage::qdrant::QdrantStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IndexerConfig::load(None)?;
//!     let embedder = FastEmbedProvider::from_config(&config.embedding)?;
//!     let store = QdrantStore::from_config(&config.qdrant)?;
//!     let mut pipeline = IngestionPipeline::new(embedder, store, &config);
//!
//!     let mut fetcher = CursorPagedFetcher::new(
//!         &config,
//!         PreprintServer::Biorxiv,
//!         Some("2024-01-01"),
//!         Some("2024-01-02"),
//!         None,
//!     )?;
//!     let stats = pipeline.run(&mut fetcher).await?;
//!     println!("upserted {} papers", stats.upserted);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod embedding;
pub mod http;
pub mod identity;
pub mod ingestion;
pub mod models;
pub mod provider;
pub mod query;
pub mod storage;

// Re-export commonly used types at the crate root
pub use config::IndexerConfig;
pub use embedding::{DocumentInput, EmbeddingProvider};
pub use identity::point_id;
pub use models::{PaperRecord, PaperSource, PaperVersion, RelevanceLevel, SearchResult};
pub use provider::{PaperProvider, SourceFetcher};
pub use query::{PaperQuery, SearchEngine};
pub use storage::VectorStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default collection name in the vector store
pub const DEFAULT_COLLECTION_NAME: &str = "papers";

/// Number of records embedded and upserted per store call
pub const CHUNK_SIZE: usize = 100;
