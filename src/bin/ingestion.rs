//! Ingestion binary entry point.
//!
//! Pulls paper metadata from one source, embeds it and upserts it into the
//! vector store. Re-running the same command updates the same points.
//!
//! # Examples
//!
//! Index two days of bioRxiv:
//! ```bash
//! ingestion --source biorxiv --start-date 2024-01-01 --end-date 2024-01-02
//! ```
//!
//! Preview normalized arXiv records without indexing:
//! ```bash
//! ingestion --source arxiv --snapshot arxiv-metadata.json --category cs.LG --limit 5 --dry-run
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use paper_indexer::{
    config::IndexerConfig,
    embedding::{fastembed::FastEmbedProvider, EmbeddingProvider},
    ingestion::IngestionPipeline,
    models::PaperSource,
    provider::{FetchRequest, PaperProvider, SourceFetcher},
    storage::qdrant::QdrantStore,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Source selector on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
enum SourceArg {
    /// arXiv bulk metadata snapshot (requires --snapshot or a configured path)
    Arxiv,
    /// bioRxiv details API (requires --start-date and --end-date)
    Biorxiv,
    /// medRxiv details API (requires --start-date and --end-date)
    Medrxiv,
    /// ChemRxiv public API
    Chemrxiv,
}

impl From<SourceArg> for PaperSource {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Arxiv => PaperSource::Arxiv,
            SourceArg::Biorxiv => PaperSource::Biorxiv,
            SourceArg::Medrxiv => PaperSource::Medrxiv,
            SourceArg::Chemrxiv => PaperSource::Chemrxiv,
        }
    }
}

/// Ingestion CLI for building and updating the paper index
#[derive(Parser, Debug)]
#[command(
    name = "ingestion",
    version,
    about = "Fetch paper metadata and index it in the vector store",
    long_about = "Fetches paper metadata from arXiv, bioRxiv, medRxiv or ChemRxiv, embeds each record and upserts it into a Qdrant collection.

EXAMPLES:
  Index a date range from medRxiv:
    ingestion --source medrxiv --start-date 2024-03-01 --end-date 2024-03-07

  Index the arXiv snapshot for one category and month:
    ingestion --source arxiv --snapshot arxiv-metadata.json --category hep-th --start-date 2024-01-01 --end-date 2024-01-31

  Search ChemRxiv for a term:
    ingestion --source chemrxiv --search-term catalysis --limit 500

  Use a config file and verbose logging:
    ingestion --config indexer.toml --source biorxiv --start-date 2024-01-01 --end-date 2024-01-02 --log-level debug"
)]
struct IngestionArgs {
    /// Source to ingest from
    #[arg(short, long, value_enum)]
    source: SourceArg,

    /// Inclusive lower bound on the update date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    start_date: Option<String>,

    /// Inclusive upper bound on the update date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    end_date: Option<String>,

    /// Category filter (arXiv, bioRxiv, medRxiv)
    #[arg(short, long, value_name = "CATEGORY")]
    category: Option<String>,

    /// Free-text search term (ChemRxiv)
    #[arg(long, value_name = "TERM")]
    search_term: Option<String>,

    /// Maximum number of records (arXiv, ChemRxiv)
    #[arg(short, long, value_name = "N")]
    limit: Option<usize>,

    /// arXiv snapshot file (JSON lines)
    #[arg(long, value_name = "FILE")]
    snapshot: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Target collection (overrides the configuration)
    #[arg(long, value_name = "NAME")]
    collection: Option<String>,

    /// Embedding model name (overrides the configuration)
    #[arg(long, value_name = "MODEL")]
    embedding_model: Option<String>,

    /// Print normalized records as JSON lines instead of indexing them
    #[arg(long)]
    dry_run: bool,

    /// Logging verbosity level
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

impl IngestionArgs {
    fn fetch_request(&self) -> FetchRequest {
        FetchRequest {
            start_date: self.start_date.clone(),
            end_date: self.end_date.clone(),
            category: self.category.clone(),
            search_term: self.search_term.clone(),
            limit: self.limit,
            snapshot_path: self.snapshot.clone(),
            ..FetchRequest::new(self.source.into())
        }
    }
}

/// Initialize logging subsystem with the specified level
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration and apply command-line overrides
fn load_config(args: &IngestionArgs) -> Result<IndexerConfig> {
    let mut config = IndexerConfig::load(args.config.as_deref())?;
    if let Some(collection) = &args.collection {
        config.collection_name = collection.clone();
    }
    if let Some(model) = &args.embedding_model {
        config.embedding.model = Some(model.clone());
    }
    debug!("Configuration: {:?}", config);
    Ok(config)
}

/// Create a spinner for tracking ingestion
fn create_spinner() -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("[{elapsed_precise}] {spinner} {msg}")
            .context("Invalid progress template")?,
    );
    spinner.enable_steady_tick(Duration::from_millis(120));
    Ok(spinner)
}

/// Print every normalized record as one JSON line on stdout
async fn dry_run(fetcher: &mut SourceFetcher) -> Result<usize> {
    let mut count = 0;
    while let Some(paper) = fetcher
        .next_paper()
        .await
        .with_context(|| format!("Failed to fetch from {}", fetcher.name()))?
    {
        println!(
            "{}",
            serde_json::to_string(&paper).context("Failed to serialize record")?
        );
        count += 1;
    }
    Ok(count)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = IngestionArgs::parse();

    init_logging(&args.log_level).context("Failed to initialize logging")?;
    debug!("CLI arguments: {:?}", args);

    let config = load_config(&args).context("Failed to load configuration")?;
    let start_time = Instant::now();

    // Source arguments are validated here, before any model download or network call.
    let mut fetcher = SourceFetcher::from_request(&config, &args.fetch_request())
        .context("Invalid source arguments")?;
    info!("Reading from {}", fetcher.name());

    if args.dry_run {
        let count = dry_run(&mut fetcher).await?;
        info!("Dry run printed {} records", count);
        return Ok(());
    }

    let embedder = FastEmbedProvider::from_config(&config.embedding)
        .context("Failed to initialize embedding model")?;
    info!(
        "Embedding model: {} ({} dims)",
        embedder.model_name(),
        embedder.dimension()
    );

    let store = QdrantStore::from_config(&config.qdrant)
        .context("Failed to create Qdrant client")?;
    info!(
        "Vector store: {} collection {}",
        config.qdrant.url, config.collection_name
    );

    let mut pipeline = IngestionPipeline::new(embedder, store, &config);

    let spinner = create_spinner()?;
    spinner.set_message(format!("Fetching from {}", fetcher.name()));

    let result = pipeline
        .run_with_progress(&mut fetcher, |stats| {
            spinner.set_message(format!(
                "{} papers upserted in {} batches",
                stats.upserted, stats.batches
            ));
        })
        .await;

    let stats = match result {
        Ok(stats) => stats,
        Err(e) => {
            spinner.abandon_with_message("Ingestion aborted");
            return Err(e).context("Ingestion failed");
        }
    };
    spinner.finish_with_message(format!("{} papers upserted", stats.upserted));

    let elapsed = start_time.elapsed();
    println!("\n╔════════════════════════════════════════╗");
    println!("║      Ingestion Completed               ║");
    println!("╠════════════════════════════════════════╣");
    println!("║ Records fetched:      {:>16} ║", stats.fetched);
    println!("║ Records upserted:     {:>16} ║", stats.upserted);
    println!("║ Batches:              {:>16} ║", stats.batches);
    println!("║ Elapsed time:         {:>13.2?} ║", elapsed);
    println!("╚════════════════════════════════════════╝");

    info!("Ingestion completed successfully");
    Ok(())
}
