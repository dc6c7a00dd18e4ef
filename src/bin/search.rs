//! Search binary entry point.
//!
//! This binary provides a command-line interface for querying the paper index.
//! It supports both single-query and interactive REPL modes, with flexible
//! output formatting (table or JSON) and any combination of payload filters.
//!
//! # Examples
//!
//! Single query with default settings:
//! ```bash
//! search --query "protein folding"
//! ```
//!
//! JSON output restricted to one source and date range:
//! ```bash
//! search --query "single-cell atlas" --source biorxiv \
//!     --from 2024-01-01 --to 2024-06-30 --format json
//! ```
//!
//! Interactive mode:
//! ```bash
//! search --interactive
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use paper_indexer::{
    config::IndexerConfig,
    embedding::{fastembed::FastEmbedProvider, EmbeddingProvider},
    models::{PaperSource, RelevanceLevel, SearchResult},
    query::{PaperQuery, SearchEngine},
    storage::{qdrant::QdrantStore, VectorStore},
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Output format for search results
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-friendly table with colored relevance levels
    Table,
    /// Machine-readable JSON format
    Json,
}

/// Search binary CLI for querying the paper index
#[derive(Parser, Debug)]
#[command(
    name = "search",
    version,
    about = "Search indexed papers by semantic similarity",
    long_about = "Query the paper index using semantic search, optionally restricted by id, \
                  source, authors, title, abstract, update date and categories.

EXAMPLES:
  Single query:
    search --query \"graph neural networks\"

  Only arXiv papers in two categories:
    search --query \"diffusion models\" --source arxiv --category cs.LG --category stat.ML

  Text match on authors, JSON output:
    search --query \"CRISPR screens\" --authors \"Doudna\" --format json

  Interactive mode:
    search --interactive --limit 10"
)]
struct Args {
    /// Search query (required for single-query mode, omitted in interactive mode)
    #[arg(long, short = 'q', value_name = "TEXT", conflicts_with = "interactive")]
    query: Option<String>,

    /// Number of results to return (defaults to the configured search limit)
    #[arg(long, short = 'n', value_name = "N")]
    limit: Option<usize>,

    /// Exact paper id (arXiv id or DOI)
    #[arg(long, value_name = "ID")]
    paper_id: Option<String>,

    /// Restrict to one source
    #[arg(long, value_name = "SOURCE", value_parser = parse_source)]
    source: Option<PaperSource>,

    /// Full-text match on the author list
    #[arg(long, value_name = "TEXT")]
    authors: Option<String>,

    /// Full-text match on the title
    #[arg(long, value_name = "TEXT")]
    title: Option<String>,

    /// Full-text match on the abstract
    #[arg(long = "abstract", value_name = "TEXT")]
    abstract_text: Option<String>,

    /// Papers updated on or after this date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    from: Option<String>,

    /// Papers updated on or before this date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    to: Option<String>,

    /// Papers carrying any of these categories (repeatable)
    #[arg(long = "category", short = 'c', value_name = "CATEGORY")]
    categories: Vec<String>,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Enable interactive REPL mode
    #[arg(long, short = 'i')]
    interactive: bool,

    /// Configuration file (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Collection to search (overrides the configuration)
    #[arg(long, value_name = "NAME")]
    collection: Option<String>,

    /// Logging verbosity level
    #[arg(long, default_value = "warn", value_name = "LEVEL")]
    log_level: String,
}

impl Args {
    /// Filters and limit shared by every query of this session.
    fn query_template(&self, default_limit: usize) -> PaperQuery {
        PaperQuery {
            paper_id: self.paper_id.clone(),
            source: self.source,
            authors: self.authors.clone(),
            title: self.title.clone(),
            abstract_text: self.abstract_text.clone(),
            min_update_date: self.from.clone(),
            max_update_date: self.to.clone(),
            categories: self.categories.clone(),
            limit: self.limit.unwrap_or(default_limit),
            ..PaperQuery::new(String::new())
        }
    }
}

fn parse_source(value: &str) -> Result<PaperSource, String> {
    value.parse()
}

/// Setup logging with the specified level
fn setup_logging(log_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .init();
}

/// Execute a search query and return results
async fn execute_search<E: EmbeddingProvider, S: VectorStore>(
    engine: &SearchEngine<E, S>,
    template: &PaperQuery,
    query_text: &str,
) -> Result<Vec<SearchResult>> {
    debug!("Executing search for query: {}", query_text);

    let query = PaperQuery {
        text: query_text.to_string(),
        ..template.clone()
    };

    engine
        .search(&query)
        .await
        .with_context(|| format!("Failed to execute search for query: '{}'", query_text))
}

/// Shorten `text` to at most `max` characters
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let head: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// Format results as a pretty table
fn format_results_table(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No results found.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Rank").add_attribute(Attribute::Bold),
        Cell::new("Title").add_attribute(Attribute::Bold),
        Cell::new("Authors").add_attribute(Attribute::Bold),
        Cell::new("Source").add_attribute(Attribute::Bold),
        Cell::new("Updated").add_attribute(Attribute::Bold),
        Cell::new("Relevance").add_attribute(Attribute::Bold),
        Cell::new("Score").add_attribute(Attribute::Bold),
    ]);

    for (idx, result) in results.iter().enumerate() {
        let (relevance_str, color) = match result.relevance {
            RelevanceLevel::Identical => ("IDENTICAL", Color::Green),
            RelevanceLevel::HighlySimilar => ("HIGHLY_SIMILAR", Color::Cyan),
            RelevanceLevel::Similar => ("SIMILAR", Color::Yellow),
            RelevanceLevel::Relevant => ("RELEVANT", Color::White),
        };

        table.add_row(vec![
            Cell::new(idx + 1),
            Cell::new(truncate(&result.paper.title, 60)),
            Cell::new(truncate(&result.paper.authors, 40)),
            Cell::new(result.paper.source.as_str()),
            Cell::new(&result.paper.update_date),
            Cell::new(relevance_str).fg(color),
            Cell::new(format!("{:.4}", result.score)),
        ]);
    }

    table.to_string()
}

/// Format results as JSON
fn format_results_json(results: &[SearchResult]) -> Result<String> {
    serde_json::to_string_pretty(results).context("Failed to serialize results to JSON")
}

/// Print results in the selected format
fn print_results(results: &[SearchResult], format: OutputFormat, elapsed_secs: f64) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{}", format_results_table(results));
            println!("\nFound {} results in {:.2}s", results.len(), elapsed_secs);
        }
        OutputFormat::Json => println!("{}", format_results_json(results)?),
    }
    Ok(())
}

/// Display detailed view of a single result
fn display_result_detail(result: &SearchResult, rank: usize) {
    let paper = &result.paper;
    println!("\n{}", "═".repeat(80));
    println!("Rank: {}", rank);
    println!("Id: {} ({})", paper.paper_id, paper.source);
    println!("Title: {}", paper.title);
    println!("Authors: {}", paper.authors);
    println!("Updated: {}", paper.update_date);
    if !paper.categories.is_empty() {
        println!("Categories: {}", paper.categories.join(", "));
    }
    if let Some(doi) = &paper.doi {
        println!("DOI: {}", doi);
    }
    if let Some(journal_ref) = &paper.journal_ref {
        println!("Journal: {}", journal_ref);
    }
    if let Some(license) = &paper.license {
        println!("License: {}", license);
    }
    println!("Relevance: {:?}", result.relevance);
    println!("Score: {:.4}", result.score);
    println!("\nAbstract:\n{}", paper.abstract_text);
    println!("{}", "═".repeat(80));
}

fn print_help() {
    println!("Commands:");
    println!("  <query>            - Search for papers");
    println!("  /top N             - Set number of results to N");
    println!("  /source NAME|clear - Restrict to one source");
    println!("  /from DATE|clear   - Papers updated on or after DATE");
    println!("  /to DATE|clear     - Papers updated on or before DATE");
    println!("  /category A B ...  - Papers carrying any of these categories (/category clear)");
    println!("  /filters           - Show active filters");
    println!("  /format table      - Use table output format");
    println!("  /format json       - Use JSON output format");
    println!("  /detail N          - Show full details for result rank N");
    println!("  /help              - Show this help");
    println!("  Ctrl+D or Ctrl+C   - Exit");
}

/// `None` for "clear", the value otherwise
fn clearable(value: &str) -> Option<String> {
    (value != "clear").then(|| value.to_string())
}

/// Run interactive REPL mode
async fn run_interactive<E: EmbeddingProvider, S: VectorStore>(
    engine: SearchEngine<E, S>,
    mut template: PaperQuery,
    mut format: OutputFormat,
) -> Result<()> {
    println!("Interactive Paper Search");
    print_help();
    println!();

    let mut rl = DefaultEditor::new().context("Failed to create readline editor")?;
    let mut last_results: Vec<SearchResult> = Vec::new();

    loop {
        let readline = rl.readline("Search> ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line).ok();

                if line.starts_with('/') {
                    let parts: Vec<&str> = line.split_whitespace().collect();
                    match parts.as_slice() {
                        ["/help"] => print_help(),
                        ["/top", n] => match n.parse::<usize>() {
                            Ok(n) if n > 0 => {
                                template.limit = n;
                                println!("Set limit to {}", n);
                            }
                            _ => eprintln!("Invalid number: must be a positive integer"),
                        },
                        ["/source", "clear"] => {
                            template.source = None;
                            println!("Cleared source filter");
                        }
                        ["/source", name] => match name.parse::<PaperSource>() {
                            Ok(source) => {
                                template.source = Some(source);
                                println!("Set source filter: {}", source);
                            }
                            Err(e) => eprintln!("{}", e),
                        },
                        ["/from", date] => {
                            template.min_update_date = clearable(date);
                            println!("From date: {}", date);
                        }
                        ["/to", date] => {
                            template.max_update_date = clearable(date);
                            println!("To date: {}", date);
                        }
                        ["/category", "clear"] => {
                            template.categories.clear();
                            println!("Cleared category filter");
                        }
                        ["/category", categories @ ..] if !categories.is_empty() => {
                            template.categories =
                                categories.iter().map(|c| c.to_string()).collect();
                            println!("Set category filter: {}", template.categories.join(", "));
                        }
                        ["/filters"] => match template.filter() {
                            Some(filter) => println!(
                                "{}",
                                serde_json::to_string_pretty(&filter)
                                    .context("Failed to serialize filter")?
                            ),
                            None => println!("No filters"),
                        },
                        ["/format", "table"] => {
                            format = OutputFormat::Table;
                            println!("Set output format to table");
                        }
                        ["/format", "json"] => {
                            format = OutputFormat::Json;
                            println!("Set output format to JSON");
                        }
                        ["/detail", n] => match n.parse::<usize>() {
                            Ok(rank) if rank > 0 && rank <= last_results.len() => {
                                display_result_detail(&last_results[rank - 1], rank);
                            }
                            Ok(rank) if rank > last_results.len() => {
                                eprintln!(
                                    "Rank {} out of range (last search had {} results)",
                                    rank,
                                    last_results.len()
                                );
                            }
                            _ => eprintln!("Invalid rank: must be a positive integer"),
                        },
                        _ => eprintln!(
                            "Unknown or malformed command: {}. Type /help for available commands.",
                            line
                        ),
                    }
                } else {
                    let start = Instant::now();
                    match execute_search(&engine, &template, line).await {
                        Ok(results) => {
                            if let Err(e) =
                                print_results(&results, format, start.elapsed().as_secs_f64())
                            {
                                eprintln!("Error formatting results: {}", e);
                            }
                            last_results = results;
                        }
                        Err(e) => eprintln!("Search failed: {:#}", e),
                    }
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                error!("Error reading input: {}", err);
                break;
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level);

    let mut config =
        IndexerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(collection) = &args.collection {
        config.collection_name = collection.clone();
    }

    // Validate filters before loading the model
    let template = args.query_template(config.search_limit);
    PaperQuery {
        text: args.query.clone().unwrap_or_else(|| "-".to_string()),
        ..template.clone()
    }
    .validate()
    .context("Invalid search arguments")?;

    let query = match (&args.query, args.interactive) {
        (Some(query), false) => Some(query.clone()),
        (None, true) => None,
        _ => anyhow::bail!(
            "Either --query or --interactive must be specified.\n\
             Use --help for usage information."
        ),
    };

    let store = QdrantStore::from_config(&config.qdrant).context("Failed to create Qdrant client")?;
    if !store
        .collection_exists(&config.collection_name)
        .await
        .context("Failed to reach the vector store")?
    {
        anyhow::bail!(
            "Collection '{}' not found at {}.\n\
             Please run the ingestion binary first.",
            config.collection_name,
            config.qdrant.url
        );
    }
    let count = store.count(&config.collection_name).await?;
    info!("Collection {} holds {} papers", config.collection_name, count);

    let embedder = FastEmbedProvider::from_config(&config.embedding)
        .context("Failed to initialize embedding model")?;
    info!(
        "Using embedding model: {} (dimension: {})",
        embedder.model_name(),
        embedder.dimension()
    );

    let engine = SearchEngine::new(embedder, store, config.collection_name.clone());

    match query {
        Some(query) => {
            let start = Instant::now();
            let results = execute_search(&engine, &template, &query).await?;
            print_results(&results, args.format, start.elapsed().as_secs_f64())?;
        }
        None => run_interactive(engine, template, args.format).await?,
    }

    Ok(())
}
