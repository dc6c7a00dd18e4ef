//! Query processing module.
//!
//! This module turns a free-text query plus optional structured constraints
//! into one similarity search against the vector store. The query text is
//! embedded in query mode, the constraints become a single conjunctive
//! [`filter::Filter`], and the store's ranking is returned unchanged.
//!
//! # Usage
//!
//! ```rust,no_run
//! use paper_indexer::config::IndexerConfig;
//! use paper_indexer::embedding::fastembed::FastEmbedProvider;
//! use paper_indexer::query::{PaperQuery, SearchEngine};
//! use paper_indexer::storage::qdrant::QdrantStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IndexerConfig::default();
//! let embedder = FastEmbedProvider::from_config(&config.embedding)?;
//! let store = QdrantStore::from_config(&config.qdrant)?;
//! let engine = SearchEngine::new(embedder, store, &config.collection_name);
//!
//! let query = PaperQuery::new("protein structure prediction")
//!     .with_categories(vec!["q-bio.BM".to_string()])
//!     .with_min_update_date("2023-01-01")
//!     .with_limit(5);
//! for result in engine.search(&query).await? {
//!     println!("{} - Score: {:.3}", result.paper.title, result.score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod filter;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::models::{PaperRecord, PaperSource, SearchResult};
use crate::storage::{StorageError, VectorStore};
use filter::{parse_timestamp, Condition, Filter};

/// Default number of results.
pub const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Errors that can occur during query processing.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    EmbeddingError(#[from] EmbeddingError),

    /// Storage access failed
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    /// Invalid query parameters
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// A stored payload could not be decoded into a paper
    #[error("Failed to decode stored paper {id}: {message}")]
    DecodeError {
        /// Point id
        id: u64,
        /// Decoder message
        message: String,
    },
}

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Search query parameters.
///
/// Every constraint is optional; empty strings and empty category lists are
/// treated as not supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperQuery {
    /// Free text, embedded in query mode
    pub text: String,

    /// Exact natural key
    pub paper_id: Option<String>,

    /// Exact provenance tag
    pub source: Option<PaperSource>,

    /// Full-text match on authors
    pub authors: Option<String>,

    /// Full-text match on title
    pub title: Option<String>,

    /// Full-text match on abstract
    pub abstract_text: Option<String>,

    /// Inclusive lower bound on update date
    pub min_update_date: Option<String>,

    /// Inclusive upper bound on update date
    pub max_update_date: Option<String>,

    /// Match papers carrying any of these categories
    pub categories: Vec<String>,

    /// Maximum number of results
    pub limit: usize,
}

impl PaperQuery {
    /// Create a query with no constraints and the default limit.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            paper_id: None,
            source: None,
            authors: None,
            title: None,
            abstract_text: None,
            min_update_date: None,
            max_update_date: None,
            categories: Vec::new(),
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }

    /// Match this exact natural key.
    pub fn with_paper_id(mut self, paper_id: impl Into<String>) -> Self {
        self.paper_id = Some(paper_id.into());
        self
    }

    /// Restrict to one source.
    pub fn with_source(mut self, source: PaperSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Full-text match on the author list.
    pub fn with_authors(mut self, authors: impl Into<String>) -> Self {
        self.authors = Some(authors.into());
        self
    }

    /// Full-text match on the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Full-text match on the abstract.
    pub fn with_abstract(mut self, text: impl Into<String>) -> Self {
        self.abstract_text = Some(text.into());
        self
    }

    /// Papers updated on or after `date`.
    pub fn with_min_update_date(mut self, date: impl Into<String>) -> Self {
        self.min_update_date = Some(date.into());
        self
    }

    /// Papers updated on or before `date`.
    pub fn with_max_update_date(mut self, date: impl Into<String>) -> Self {
        self.max_update_date = Some(date.into());
        self
    }

    /// Papers carrying any of `categories`.
    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    /// Maximum number of results.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// The conjunction of every supplied constraint, or `None` if there are none.
    ///
    /// Conditions appear in a fixed order: paper id, source, authors, title,
    /// abstract, update-date range, categories.
    pub fn filter(&self) -> Option<Filter> {
        let mut must = Vec::new();

        if let Some(paper_id) = supplied(&self.paper_id) {
            must.push(Condition::exact("paper_id", paper_id));
        }
        if let Some(source) = self.source {
            must.push(Condition::exact("source", source.as_str()));
        }
        for (key, value) in [
            ("authors", &self.authors),
            ("title", &self.title),
            ("abstract", &self.abstract_text),
        ] {
            if let Some(text) = supplied(value) {
                must.push(Condition::text(key, text));
            }
        }

        let gte = supplied(&self.min_update_date).map(String::from);
        let lte = supplied(&self.max_update_date).map(String::from);
        if gte.is_some() || lte.is_some() {
            must.push(Condition::datetime_range("update_date", gte, lte));
        }

        let categories: Vec<String> = self
            .categories
            .iter()
            .filter(|c| !c.is_empty())
            .cloned()
            .collect();
        if !categories.is_empty() {
            must.push(Condition::any("categories", categories));
        }

        if must.is_empty() {
            None
        } else {
            Some(Filter::new(must))
        }
    }

    /// Check the query before any embedding work is done.
    pub fn validate(&self) -> QueryResult<()> {
        if self.text.trim().is_empty() {
            return Err(QueryError::InvalidQuery("Query text cannot be empty".to_string()));
        }
        if self.limit == 0 {
            return Err(QueryError::InvalidQuery("Limit must be positive".to_string()));
        }
        for date in [&self.min_update_date, &self.max_update_date] {
            if let Some(date) = supplied(date) {
                if parse_timestamp(date).is_none() {
                    return Err(QueryError::InvalidQuery(format!(
                        "Invalid date '{}' (expected YYYY-MM-DD or RFC 3339)",
                        date
                    )));
                }
            }
        }
        Ok(())
    }
}

fn supplied(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 when either vector has zero magnitude. Extra elements of the
/// longer vector are ignored.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot_product / (norm_a * norm_b)
}

/// Filtered similarity search over one collection.
pub struct SearchEngine<E, S>
where
    E: EmbeddingProvider,
    S: VectorStore,
{
    /// Embedding provider for query embedding
    embedding_provider: E,

    /// Vector store holding the papers
    store: S,

    /// Collection to search
    collection: String,
}

impl<E, S> SearchEngine<E, S>
where
    E: EmbeddingProvider,
    S: VectorStore,
{
    /// Create a new search engine over `collection`.
    pub fn new(embedding_provider: E, store: S, collection: impl Into<String>) -> Self {
        Self {
            embedding_provider,
            store,
            collection: collection.into(),
        }
    }

    /// Execute a search query.
    ///
    /// # Returns
    /// Results in the store's order (highest score first)
    ///
    /// # Errors
    /// `InvalidQuery` before any work if the query is malformed; otherwise
    /// whatever the embedder or store reports
    pub async fn search(&self, query: &PaperQuery) -> QueryResult<Vec<SearchResult>> {
        query.validate()?;

        let vector = self.embedding_provider.embed_query(&query.text).await?;
        let filter = query.filter();
        debug!(
            "Searching {} (limit {}, {} conditions)",
            self.collection,
            query.limit,
            filter.as_ref().map_or(0, |f| f.must.len())
        );

        let hits = self
            .store
            .search(&self.collection, &vector, filter.as_ref(), query.limit)
            .await?;

        hits.into_iter()
            .map(|hit| {
                let paper = PaperRecord::from_payload(&hit.payload).map_err(|e| {
                    QueryError::DecodeError {
                        id: hit.id,
                        message: e.to_string(),
                    }
                })?;
                Ok(SearchResult::new(hit.id, paper, hit.score))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{DocumentInput, EmbeddingResult};
    use crate::identity::point_id;
    use crate::storage::memory::InMemoryStore;
    use crate::storage::{FieldIndexKind, ScoredPoint, StorageResult, VectorPoint};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    // Mock EmbeddingProvider: every query maps to the same fixed vector
    struct MockEmbeddingProvider {
        query_calls: Arc<Mutex<Vec<String>>>,
        should_fail: bool,
    }

    impl MockEmbeddingProvider {
        fn new() -> Self {
            Self {
                query_calls: Arc::new(Mutex::new(Vec::new())),
                should_fail: false,
            }
        }

        fn with_failure() -> Self {
            Self {
                should_fail: true,
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for MockEmbeddingProvider {
        async fn embed_documents(
            &self,
            docs: &[DocumentInput<'_>],
        ) -> EmbeddingResult<Vec<Vec<f32>>> {
            Ok(docs.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        async fn embed_query(&self, query: &str) -> EmbeddingResult<Vec<f32>> {
            if self.should_fail {
                return Err(EmbeddingError::ModelError("Mock embedding failure".to_string()));
            }
            self.query_calls.lock().unwrap().push(query.to_string());
            Ok(vec![1.0, 0.0])
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "mock-model"
        }
    }

    // Store wrapper that records the filter of each search
    struct RecordingStore {
        inner: InMemoryStore,
        filters: Arc<Mutex<Vec<Option<Filter>>>>,
    }

    #[async_trait]
    impl VectorStore for RecordingStore {
        async fn collection_exists(&self, name: &str) -> StorageResult<bool> {
            self.inner.collection_exists(name).await
        }

        async fn create_collection(&self, name: &str, dimension: usize) -> StorageResult<()> {
            self.inner.create_collection(name, dimension).await
        }

        async fn create_field_index(
            &self,
            name: &str,
            field: &str,
            kind: FieldIndexKind,
        ) -> StorageResult<()> {
            self.inner.create_field_index(name, field, kind).await
        }

        async fn upsert(&self, name: &str, points: Vec<VectorPoint>) -> StorageResult<()> {
            self.inner.upsert(name, points).await
        }

        async fn count(&self, name: &str) -> StorageResult<usize> {
            self.inner.count(name).await
        }

        async fn search(
            &self,
            name: &str,
            vector: &[f32],
            filter: Option<&Filter>,
            limit: usize,
        ) -> StorageResult<Vec<ScoredPoint>> {
            self.filters.lock().unwrap().push(filter.cloned());
            self.inner.search(name, vector, filter, limit).await
        }
    }

    fn paper(id: &str, source: PaperSource, title: &str, date: &str, cats: &[&str]) -> PaperRecord {
        PaperRecord {
            paper_id: id.to_string(),
            source,
            title: title.to_string(),
            abstract_text: format!("Abstract of {}", title),
            authors: "Ada Lovelace".to_string(),
            update_date: date.to_string(),
            categories: cats.iter().map(|c| c.to_string()).collect(),
            doi: None,
            journal_ref: None,
            license: None,
            versions: None,
            submitter: None,
            comments: None,
        }
    }

    fn paper_by(id: &str, authors: &str, date: &str) -> PaperRecord {
        PaperRecord {
            authors: authors.to_string(),
            ..paper(id, PaperSource::Arxiv, "Sparse attention", date, &["cs.LG"])
        }
    }

    async fn seeded_store(papers: &[(PaperRecord, Vec<f32>)]) -> InMemoryStore {
        let store = InMemoryStore::new();
        store.create_collection("papers", 2).await.unwrap();
        let points = papers
            .iter()
            .map(|(p, v)| VectorPoint {
                id: point_id(&p.paper_id),
                vector: v.clone(),
                payload: p.to_payload(),
            })
            .collect();
        store.upsert("papers", points).await.unwrap();
        store
    }

    #[test]
    fn test_no_constraints_means_no_filter() {
        let query = PaperQuery::new("graphs")
            .with_title("")
            .with_categories(vec![]);
        assert!(query.filter().is_none());
    }

    #[test]
    fn test_filter_includes_only_supplied_constraints() {
        let query = PaperQuery::new("graphs")
            .with_source(PaperSource::Arxiv)
            .with_title("neural")
            .with_max_update_date("2024-12-31")
            .with_categories(vec!["cs.LG".to_string()]);

        let filter = query.filter().unwrap();
        let keys: Vec<&str> = filter.must.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["source", "title", "update_date", "categories"]);
        assert_eq!(
            filter.must[2],
            Condition::datetime_range("update_date", None, Some("2024-12-31".to_string()))
        );
    }

    #[test]
    fn test_author_and_min_date_filter_shape() {
        let query = PaperQuery::new("sparse attention")
            .with_authors("Smith")
            .with_min_update_date("2024-01-01");

        let filter = query.filter().unwrap();
        assert_eq!(
            filter.must,
            vec![
                Condition::text("authors", "Smith"),
                Condition::datetime_range("update_date", Some("2024-01-01".to_string()), None),
            ]
        );
    }

    #[test]
    fn test_abstract_maps_to_abstract_key() {
        let filter = PaperQuery::new("x")
            .with_abstract("protein folding")
            .filter()
            .unwrap();
        assert_eq!(filter.must, vec![Condition::text("abstract", "protein folding")]);
    }

    #[tokio::test]
    async fn test_author_and_min_date_must_both_hold() {
        let store = seeded_store(&[
            (paper_by("smith-2024", "J. Smith, A. Lee", "2024-03-01"), vec![1.0, 0.0]),
            (paper_by("smith-2023", "J. Smith", "2023-06-15"), vec![1.0, 0.0]),
            (paper_by("jones-2024", "R. Jones", "2024-02-10"), vec![1.0, 0.0]),
        ])
        .await;
        let engine = SearchEngine::new(MockEmbeddingProvider::new(), store, "papers");

        let query = PaperQuery::new("sparse attention")
            .with_authors("Smith")
            .with_min_update_date("2024-01-01");
        let results = engine.search(&query).await.unwrap();

        let ids: Vec<&str> = results.iter().map(|r| r.paper.paper_id.as_str()).collect();
        assert_eq!(ids, vec!["smith-2024"]);
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            PaperQuery::new("  ").validate(),
            Err(QueryError::InvalidQuery(_))
        ));
        assert!(matches!(
            PaperQuery::new("x").with_limit(0).validate(),
            Err(QueryError::InvalidQuery(_))
        ));
        assert!(matches!(
            PaperQuery::new("x").with_min_update_date("last week").validate(),
            Err(QueryError::InvalidQuery(_))
        ));
        assert!(PaperQuery::new("x").with_min_update_date("2024-01-01").validate().is_ok());
    }

    #[tokio::test]
    async fn test_constraints_are_conjunctive() {
        let store = seeded_store(&[
            (
                paper("a", PaperSource::Arxiv, "Neural graphs", "2024-01-10", &["cs.LG"]),
                vec![1.0, 0.0],
            ),
            (
                paper("b", PaperSource::Arxiv, "Neural graphs", "2022-01-10", &["cs.LG"]),
                vec![1.0, 0.0],
            ),
            (
                paper("c", PaperSource::Biorxiv, "Neural graphs", "2024-01-10", &["cs.LG"]),
                vec![1.0, 0.0],
            ),
            (
                paper("d", PaperSource::Arxiv, "Protein folding", "2024-01-10", &["cs.LG"]),
                vec![1.0, 0.0],
            ),
            (
                paper("e", PaperSource::Arxiv, "Neural graphs", "2024-01-10", &["math.CO"]),
                vec![1.0, 0.0],
            ),
        ])
        .await;
        let engine = SearchEngine::new(MockEmbeddingProvider::new(), store, "papers");

        let query = PaperQuery::new("graph learning")
            .with_source(PaperSource::Arxiv)
            .with_title("neural")
            .with_min_update_date("2023-01-01")
            .with_categories(vec!["cs.LG".to_string(), "stat.ML".to_string()]);
        let results = engine.search(&query).await.unwrap();

        let ids: Vec<&str> = results.iter().map(|r| r.paper.paper_id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[tokio::test]
    async fn test_results_keep_store_order_and_carry_ids() {
        let store = seeded_store(&[
            (paper("far", PaperSource::Arxiv, "T", "2024-01-01", &[]), vec![0.0, 1.0]),
            (paper("near", PaperSource::Arxiv, "T", "2024-01-01", &[]), vec![1.0, 0.05]),
            (paper("mid", PaperSource::Arxiv, "T", "2024-01-01", &[]), vec![0.6, 0.6]),
        ])
        .await;
        let embedder = MockEmbeddingProvider::new();
        let calls = Arc::clone(&embedder.query_calls);
        let engine = SearchEngine::new(embedder, store, "papers");

        let results = engine.search(&PaperQuery::new("anything").with_limit(2)).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].paper.paper_id, "near");
        assert_eq!(results[0].id, point_id("near"));
        assert_eq!(results[1].paper.paper_id, "mid");
        assert!(results[0].score >= results[1].score);
        assert_eq!(*calls.lock().unwrap(), vec!["anything".to_string()]);
    }

    #[tokio::test]
    async fn test_unfiltered_query_sends_no_filter() {
        let filters = Arc::new(Mutex::new(Vec::new()));
        let store = RecordingStore {
            inner: seeded_store(&[]).await,
            filters: Arc::clone(&filters),
        };
        let engine = SearchEngine::new(MockEmbeddingProvider::new(), store, "papers");

        engine.search(&PaperQuery::new("x")).await.unwrap();
        engine
            .search(&PaperQuery::new("x").with_paper_id("2401.00001"))
            .await
            .unwrap();

        let filters = filters.lock().unwrap();
        assert_eq!(filters[0], None);
        assert_eq!(
            filters[1],
            Some(Filter::new(vec![Condition::exact("paper_id", "2401.00001")]))
        );
    }

    #[tokio::test]
    async fn test_embedding_failure_propagates() {
        let store = seeded_store(&[]).await;
        let engine = SearchEngine::new(MockEmbeddingProvider::with_failure(), store, "papers");
        assert!(matches!(
            engine.search(&PaperQuery::new("x")).await,
            Err(QueryError::EmbeddingError(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_collection_is_storage_error() {
        let engine =
            SearchEngine::new(MockEmbeddingProvider::new(), InMemoryStore::new(), "papers");
        assert!(matches!(
            engine.search(&PaperQuery::new("x")).await,
            Err(QueryError::StorageError(StorageError::NotFound(_)))
        ));
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
