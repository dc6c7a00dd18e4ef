//! Paper provider module.
//!
//! This module defines the interface for sourcing paper metadata and the three
//! fetch strategies behind it:
//!
//! - [`snapshot::SnapshotFetcher`] scans the arXiv bulk snapshot file
//! - [`cursor::CursorPagedFetcher`] pages through the bioRxiv/medRxiv API by cursor
//! - [`offset::OffsetPagedFetcher`] pages through the ChemRxiv API by skip/limit
//!
//! Each fetcher is a small state machine advanced one record at a time through
//! [`PaperProvider::next_paper`]. Pages are requested strictly in sequence and
//! records within a page are yielded in the order the source returned them.
//! [`SourceFetcher`] wraps the three variants so callers can pick one at runtime.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use crate::config::IndexerConfig;
use crate::models::{PaperRecord, PaperSource};

pub mod cursor;
pub mod normalize;
pub mod offset;
pub mod snapshot;

use cursor::CursorPagedFetcher;
use offset::OffsetPagedFetcher;
use snapshot::SnapshotFetcher;

/// Errors that can occur when fetching papers from a provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Failed to read from the data source
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A source record could not be parsed or normalized
    #[error("Parse error{}: {message}", line_suffix(.line))]
    ParseError {
        /// 1-based line number for line-oriented sources
        line: Option<usize>,
        /// What went wrong
        message: String,
    },

    /// A page request failed after all retries; the stream ended early
    #[error("Fetch from {source_name} aborted: {message}")]
    FetchAborted {
        /// Provider name
        source_name: String,
        /// Last error seen
        message: String,
    },

    /// The fetcher was asked to run without a required argument
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

fn line_suffix(line: &Option<usize>) -> String {
    line.map(|l| format!(" at line {}", l)).unwrap_or_default()
}

impl ProviderError {
    pub(crate) fn parse(line: Option<usize>, message: impl Into<String>) -> Self {
        ProviderError::ParseError {
            line,
            message: message.into(),
        }
    }
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// A lazy, finite sequence of canonical paper records.
///
/// # Design Notes
///
/// - `Ok(None)` marks the end of the sequence; every later call also returns `Ok(None)`
/// - An `Err` is returned at most once per fetch and ends the sequence; records
///   yielded before it remain valid
/// - Providers are responsible for their own pagination and rate limiting
#[async_trait]
pub trait PaperProvider: Send {
    /// Advance the sequence by one record.
    async fn next_paper(&mut self) -> ProviderResult<Option<PaperRecord>>;

    /// Drain the remaining records into a vector.
    ///
    /// Useful for small fetches and tests; the ingestion pipeline pulls records
    /// one at a time instead.
    async fn collect_papers(&mut self) -> ProviderResult<Vec<PaperRecord>> {
        let mut papers = Vec::new();
        while let Some(paper) = self.next_paper().await? {
            papers.push(paper);
        }
        Ok(papers)
    }

    /// Get a human-readable name of this provider, for logging.
    fn name(&self) -> &str;
}

/// Adapt a provider into a `futures::Stream`.
///
/// The stream ends after the provider's end marker or after its first error.
pub fn paper_stream<P>(provider: P) -> impl Stream<Item = ProviderResult<PaperRecord>> + Send
where
    P: PaperProvider,
{
    futures::stream::unfold(Some(provider), |state| async move {
        let mut provider = state?;
        match provider.next_paper().await {
            Ok(Some(paper)) => Some((Ok(paper), Some(provider))),
            Ok(None) => None,
            Err(e) => Some((Err(e), None)),
        }
    })
}

/// The two servers behind the cursor-paged details API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreprintServer {
    /// bioRxiv
    Biorxiv,
    /// medRxiv
    Medrxiv,
}

impl PreprintServer {
    /// Path segment used by the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            PreprintServer::Biorxiv => "biorxiv",
            PreprintServer::Medrxiv => "medrxiv",
        }
    }

    /// Provenance tag for records from this server.
    pub fn source(&self) -> PaperSource {
        match self {
            PreprintServer::Biorxiv => PaperSource::Biorxiv,
            PreprintServer::Medrxiv => PaperSource::Medrxiv,
        }
    }
}

impl fmt::Display for PreprintServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PreprintServer {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "biorxiv" => Ok(PreprintServer::Biorxiv),
            "medrxiv" => Ok(PreprintServer::Medrxiv),
            other => Err(ProviderError::ConfigError(format!("Invalid server: {}", other))),
        }
    }
}

/// Everything a caller may specify when asking for records from one source.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Which source to read
    pub source: PaperSource,

    /// Inclusive lower bound on the update date (YYYY-MM-DD)
    pub start_date: Option<String>,

    /// Inclusive upper bound on the update date (YYYY-MM-DD)
    pub end_date: Option<String>,

    /// Category filter (snapshot, bioRxiv, medRxiv)
    pub category: Option<String>,

    /// Free-text search term (ChemRxiv)
    pub search_term: Option<String>,

    /// Maximum records (snapshot, ChemRxiv); falls back to the configured default
    pub limit: Option<usize>,

    /// Snapshot file location; falls back to the configured path
    pub snapshot_path: Option<PathBuf>,
}

impl FetchRequest {
    /// A request for `source` with no filters.
    pub fn new(source: PaperSource) -> Self {
        Self {
            source,
            start_date: None,
            end_date: None,
            category: None,
            search_term: None,
            limit: None,
            snapshot_path: None,
        }
    }
}

/// Runtime-selected source fetcher.
#[derive(Debug)]
pub enum SourceFetcher {
    /// arXiv bulk snapshot scan
    Snapshot(SnapshotFetcher),
    /// bioRxiv/medRxiv cursor pagination
    CursorPaged(CursorPagedFetcher),
    /// ChemRxiv offset pagination
    OffsetPaged(OffsetPagedFetcher),
}

impl SourceFetcher {
    /// Build the fetcher for `request.source`.
    ///
    /// Arguments a source requires are validated here, before any file is opened
    /// or any request is sent.
    pub fn from_request(config: &IndexerConfig, request: &FetchRequest) -> ProviderResult<Self> {
        let limit = request.limit.unwrap_or(config.sources.default_limit);
        match request.source {
            PaperSource::Arxiv => {
                let path = request
                    .snapshot_path
                    .clone()
                    .or_else(|| config.sources.snapshot_path.clone())
                    .ok_or_else(|| {
                        ProviderError::Precondition(
                            "arxiv requires a snapshot file path".to_string(),
                        )
                    })?;
                let fetcher = SnapshotFetcher::new(
                    path,
                    request.start_date.as_deref(),
                    request.end_date.as_deref(),
                    request.category.clone(),
                    limit,
                )?;
                Ok(SourceFetcher::Snapshot(fetcher))
            }
            PaperSource::Biorxiv | PaperSource::Medrxiv => {
                let server = if request.source == PaperSource::Biorxiv {
                    PreprintServer::Biorxiv
                } else {
                    PreprintServer::Medrxiv
                };
                let fetcher = CursorPagedFetcher::new(
                    config,
                    server,
                    request.start_date.as_deref(),
                    request.end_date.as_deref(),
                    request.category.clone(),
                )?;
                Ok(SourceFetcher::CursorPaged(fetcher))
            }
            PaperSource::Chemrxiv => {
                if request.start_date.is_some() || request.end_date.is_some() {
                    tracing::warn!("chemrxiv does not filter by date; ignoring date range");
                }
                let fetcher =
                    OffsetPagedFetcher::new(config, limit, request.search_term.clone())?;
                Ok(SourceFetcher::OffsetPaged(fetcher))
            }
        }
    }
}

#[async_trait]
impl PaperProvider for SourceFetcher {
    async fn next_paper(&mut self) -> ProviderResult<Option<PaperRecord>> {
        match self {
            SourceFetcher::Snapshot(f) => f.next_paper().await,
            SourceFetcher::CursorPaged(f) => f.next_paper().await,
            SourceFetcher::OffsetPaged(f) => f.next_paper().await,
        }
    }

    fn name(&self) -> &str {
        match self {
            SourceFetcher::Snapshot(f) => f.name(),
            SourceFetcher::CursorPaged(f) => f.name(),
            SourceFetcher::OffsetPaged(f) => f.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    /// In-memory provider that yields a fixed list, optionally failing at the end.
    struct VecProvider {
        papers: std::vec::IntoIter<PaperRecord>,
        fail_at_end: bool,
        failed: bool,
    }

    #[async_trait]
    impl PaperProvider for VecProvider {
        async fn next_paper(&mut self) -> ProviderResult<Option<PaperRecord>> {
            if let Some(paper) = self.papers.next() {
                return Ok(Some(paper));
            }
            if self.fail_at_end && !self.failed {
                self.failed = true;
                return Err(ProviderError::FetchAborted {
                    source_name: "vec".to_string(),
                    message: "boom".to_string(),
                });
            }
            Ok(None)
        }

        fn name(&self) -> &str {
            "vec"
        }
    }

    fn paper(id: &str) -> PaperRecord {
        PaperRecord {
            paper_id: id.to_string(),
            source: PaperSource::Arxiv,
            title: String::new(),
            abstract_text: String::new(),
            authors: String::new(),
            update_date: "2024-01-01".to_string(),
            categories: vec![],
            doi: None,
            journal_ref: None,
            license: None,
            versions: None,
            submitter: None,
            comments: None,
        }
    }

    #[tokio::test]
    async fn test_stream_yields_in_order_then_ends() {
        let provider = VecProvider {
            papers: vec![paper("a"), paper("b")].into_iter(),
            fail_at_end: false,
            failed: false,
        };
        let ids: Vec<String> = paper_stream(provider)
            .map(|r| r.unwrap().paper_id)
            .collect()
            .await;
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_stream_stops_after_error() {
        let provider = VecProvider {
            papers: vec![paper("a")].into_iter(),
            fail_at_end: true,
            failed: false,
        };
        let items: Vec<ProviderResult<PaperRecord>> = paper_stream(provider).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(ProviderError::FetchAborted { .. })));
    }

    #[test]
    fn test_server_discriminator_accepts_exactly_two_values() {
        assert_eq!("biorxiv".parse::<PreprintServer>().unwrap(), PreprintServer::Biorxiv);
        assert_eq!("medrxiv".parse::<PreprintServer>().unwrap(), PreprintServer::Medrxiv);
        assert!(matches!(
            "arxiv".parse::<PreprintServer>(),
            Err(ProviderError::ConfigError(_))
        ));
    }

    #[test]
    fn test_paginated_source_without_dates_is_rejected() {
        let config = IndexerConfig::default();
        let mut request = FetchRequest::new(PaperSource::Medrxiv);
        request.start_date = Some("2024-01-01".to_string());

        let result = SourceFetcher::from_request(&config, &request);
        assert!(matches!(result, Err(ProviderError::Precondition(_))));
    }

    #[test]
    fn test_snapshot_without_path_is_rejected() {
        let config = IndexerConfig::default();
        let request = FetchRequest::new(PaperSource::Arxiv);

        let result = SourceFetcher::from_request(&config, &request);
        assert!(matches!(result, Err(ProviderError::Precondition(_))));
    }

    #[test]
    fn test_chemrxiv_needs_no_dates() {
        let config = IndexerConfig::default();
        let request = FetchRequest::new(PaperSource::Chemrxiv);

        let fetcher = SourceFetcher::from_request(&config, &request).unwrap();
        assert!(matches!(fetcher, SourceFetcher::OffsetPaged(_)));
        assert_eq!(fetcher.name(), "chemrxiv");
    }
}
