//! Process-wide configuration.
//!
//! Built once at startup and passed explicitly to every component. Values are
//! layered with Figment: built-in defaults, then an optional TOML file, then
//! `PAPER_INDEXER_*` environment variables (nested keys separated by `__`, e.g.
//! `PAPER_INDEXER_QDRANT__URL`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{CHUNK_SIZE, DEFAULT_COLLECTION_NAME};

/// Default bioRxiv/medRxiv API root
pub const BIORXIV_BASE_URL: &str = "https://api.biorxiv.org";

/// Default ChemRxiv public API root
pub const CHEMRXIV_BASE_URL: &str = "https://chemrxiv.org/engage/chemrxiv/public-api/v1";

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "PAPER_INDEXER_";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Target collection in the vector store
    pub collection_name: String,

    /// Records per embed-and-upsert batch
    pub chunk_size: usize,

    /// Vector store connection
    pub qdrant: QdrantConfig,

    /// Retry and politeness settings for the paginated APIs
    pub http: HttpConfig,

    /// Source endpoints and fetch limits
    pub sources: SourceConfig,

    /// Embedding model settings
    pub embedding: EmbeddingSettings,

    /// Default number of search results
    pub search_limit: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            collection_name: DEFAULT_COLLECTION_NAME.to_string(),
            chunk_size: CHUNK_SIZE,
            qdrant: QdrantConfig::default(),
            http: HttpConfig::default(),
            sources: SourceConfig::default(),
            embedding: EmbeddingSettings::default(),
            search_limit: 20,
        }
    }
}

/// Qdrant REST endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QdrantConfig {
    /// Base URL, e.g. `http://localhost:6333`
    pub url: String,

    /// Optional `api-key` header value
    pub api_key: Option<String>,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6333".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl QdrantConfig {
    /// Request timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// HTTP client behaviour for the paginated sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout in seconds
    pub timeout_secs: f64,

    /// Total attempts per request
    pub max_retries: u32,

    /// Base of the exponential backoff, in seconds
    pub backoff_factor: f64,

    /// Pause between page requests, in seconds
    pub rate_limit_delay_secs: f64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30.0,
            max_retries: 3,
            backoff_factor: 2.0,
            rate_limit_delay_secs: 0.1,
        }
    }
}

impl HttpConfig {
    /// Request timeout as a `Duration`.
    ///
    /// Negative, infinite or NaN values fall back to the default timeout.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(HttpConfig::default().timeout_secs))
    }

    /// Inter-page pause as a `Duration` (zero when the value is unusable).
    pub fn rate_limit_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.rate_limit_delay_secs).unwrap_or_default()
    }
}

/// Source endpoints and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// bioRxiv/medRxiv API root
    pub biorxiv_base_url: String,

    /// ChemRxiv API root
    pub chemrxiv_base_url: String,

    /// Items requested per ChemRxiv page
    pub chemrxiv_page_size: usize,

    /// Default maximum records for the snapshot and ChemRxiv sources
    pub default_limit: usize,

    /// Default location of the arXiv snapshot file
    pub snapshot_path: Option<PathBuf>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            biorxiv_base_url: BIORXIV_BASE_URL.to_string(),
            chemrxiv_base_url: CHEMRXIV_BASE_URL.to_string(),
            chemrxiv_page_size: 100,
            default_limit: 10_000,
            snapshot_path: None,
        }
    }
}

/// Embedding model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// fastembed model name (e.g. "BGESmallENV15")
    pub model: Option<String>,

    /// Model cache directory
    pub cache_dir: Option<PathBuf>,

    /// Texts per model forward pass
    pub batch_size: usize,

    /// Document prompt; `{title}` and `{abstract}` are substituted
    pub document_template: String,

    /// Query prompt; `{query}` is substituted
    pub query_template: String,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: None,
            cache_dir: None,
            batch_size: 16,
            document_template: "title: {title} | text: {abstract}".to_string(),
            query_template: "task: search result | query: {query}".to_string(),
        }
    }
}

impl EmbeddingSettings {
    /// Cache directory, falling back to the user's cache dir.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .map(|p| p.join("fastembed"))
                .unwrap_or_else(|| PathBuf::from(".cache/fastembed"))
        })
    }
}

impl IndexerConfig {
    /// Load configuration from defaults, an optional TOML file and the environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        Self::figment(path)
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
    }

    /// The layered Figment used by [`IndexerConfig::load`].
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(IndexerConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = IndexerConfig::default();
        assert_eq!(config.collection_name, "papers");
        assert_eq!(config.chunk_size, 100);
        assert_eq!(config.http.max_retries, 3);
        assert_eq!(config.http.backoff_factor, 2.0);
        assert_eq!(config.http.rate_limit_delay(), Duration::from_millis(100));
        assert_eq!(config.sources.default_limit, 10_000);
        assert_eq!(config.search_limit, 20);
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "collection_name = \"papers_test\"\n[http]\nmax_retries = 5\n\
             [qdrant]\nurl = \"http://qdrant:6333\""
        )
        .unwrap();

        let config: IndexerConfig = IndexerConfig::figment(Some(file.path()))
            .extract()
            .unwrap();
        assert_eq!(config.collection_name, "papers_test");
        assert_eq!(config.http.max_retries, 5);
        assert_eq!(config.http.backoff_factor, 2.0, "unspecified keys keep defaults");
        assert_eq!(config.qdrant.url, "http://qdrant:6333");
    }

    #[test]
    fn test_non_finite_durations_do_not_panic() {
        let config = HttpConfig {
            timeout_secs: f64::INFINITY,
            rate_limit_delay_secs: f64::NAN,
            ..HttpConfig::default()
        };
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.rate_limit_delay(), Duration::ZERO);

        let negative = HttpConfig {
            timeout_secs: -1.0,
            rate_limit_delay_secs: -0.5,
            ..HttpConfig::default()
        };
        assert_eq!(negative.timeout(), Duration::from_secs(30));
        assert_eq!(negative.rate_limit_delay(), Duration::ZERO);
    }

    #[test]
    fn test_missing_file_is_ignored() {
        let config: IndexerConfig =
            IndexerConfig::figment(Some(Path::new("/nonexistent/paper-indexer.toml")))
                .extract()
                .unwrap();
        assert_eq!(config.chunk_size, 100);
    }
}
