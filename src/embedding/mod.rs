//! Embedding provider abstraction.
//!
//! This module defines the interface for text embedding generation. Documents
//! and queries are embedded through separate entry points because retrieval
//! models are usually prompted differently for each side; the prompt
//! templates live in [`PromptTemplates`].
//!
//! The abstraction allows the system to swap between different embedding models
//! without changing the core logic of ingestion or search.

pub mod fastembed;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::EmbeddingSettings;
use crate::models::PaperRecord;

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Invalid input text (e.g., empty query)
    #[error("Invalid input text: {0}")]
    InvalidInput(String),

    /// Configuration error (e.g., unknown model name)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The model failed while producing vectors
    #[error("Model error: {0}")]
    ModelError(String),

    /// The model returned the wrong number or shape of vectors
    #[error("Embedding batch mismatch: {0}")]
    BatchMismatch(String),
}

/// Result type for embedding operations.
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// The parts of a paper that go into its document embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentInput<'a> {
    /// Paper title
    pub title: &'a str,

    /// Abstract text
    pub body: &'a str,
}

impl<'a> DocumentInput<'a> {
    /// Borrow the title and abstract of a paper.
    pub fn from_paper(paper: &'a PaperRecord) -> Self {
        Self {
            title: &paper.title,
            body: &paper.abstract_text,
        }
    }
}

/// Trait for text embedding providers.
///
/// # Example Usage
/// ```ignore
/// let provider = FastEmbedProvider::from_config(&config.embedding)?;
/// let docs = [DocumentInput { title: "Attention", body: "We propose..." }];
/// let vectors = provider.embed_documents(&docs).await?;
/// let query = provider.embed_query("transformers for protein folding").await?;
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of documents in document mode.
    ///
    /// # Returns
    /// One vector per input, in input order
    async fn embed_documents(&self, docs: &[DocumentInput<'_>]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// Embed a single free-text query in query mode.
    async fn embed_query(&self, query: &str) -> EmbeddingResult<Vec<f32>>;

    /// Get the dimension of embeddings produced by this provider.
    fn dimension(&self) -> usize;

    /// Get the model name/identifier for this provider.
    fn model_name(&self) -> &str;
}

/// Prompt templates for the two embedding modes.
///
/// `{title}` and `{abstract}` are substituted in the document template,
/// `{query}` in the query template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplates {
    document: String,
    query: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        let settings = EmbeddingSettings::default();
        Self::new(settings.document_template, settings.query_template)
    }
}

impl PromptTemplates {
    /// Create templates from raw strings.
    pub fn new(document: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            query: query.into(),
        }
    }

    /// Templates configured in `settings`.
    pub fn from_settings(settings: &EmbeddingSettings) -> Self {
        Self::new(
            settings.document_template.clone(),
            settings.query_template.clone(),
        )
    }

    /// Render the prompt for a document.
    pub fn render_document(&self, doc: &DocumentInput<'_>) -> String {
        fill(&self.document, &[("title", doc.title), ("abstract", doc.body)])
    }

    /// Render the prompt for a query.
    pub fn render_query(&self, query: &str) -> String {
        fill(&self.query, &[("query", query)])
    }
}

/// Single-pass placeholder substitution; substituted text is never rescanned.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let hit = values.iter().find(|(key, _)| {
            tail[1..].starts_with(key) && tail[1 + key.len()..].starts_with('}')
        });
        match hit {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len() + 2..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Check that a model returned `expected` vectors of `dimension` floats each.
pub fn check_batch(
    vectors: &[Vec<f32>],
    expected: usize,
    dimension: usize,
) -> EmbeddingResult<()> {
    if vectors.len() != expected {
        return Err(EmbeddingError::BatchMismatch(format!(
            "expected {} vectors, got {}",
            expected,
            vectors.len()
        )));
    }
    if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dimension) {
        return Err(EmbeddingError::BatchMismatch(format!(
            "vector {} has dimension {}, expected {}",
            i,
            v.len(),
            dimension
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_templates() {
        let templates = PromptTemplates::default();
        let doc = DocumentInput {
            title: "Graph Networks",
            body: "We study graphs.",
        };
        assert_eq!(
            templates.render_document(&doc),
            "title: Graph Networks | text: We study graphs."
        );
        assert_eq!(
            templates.render_query("protein folding"),
            "task: search result | query: protein folding"
        );
    }

    #[test]
    fn test_braces_in_content_are_not_expanded() {
        let templates = PromptTemplates::new("{title}/{abstract} {other}", "{query}");
        let doc = DocumentInput {
            title: "{abstract}",
            body: "x",
        };
        assert_eq!(templates.render_document(&doc), "{abstract}/x {other}");
        assert_eq!(templates.render_query("{query}"), "{query}");
    }

    #[test]
    fn test_check_batch() {
        let ok = vec![vec![0.0; 3], vec![1.0; 3]];
        assert!(check_batch(&ok, 2, 3).is_ok());
        assert!(matches!(
            check_batch(&ok, 3, 3),
            Err(EmbeddingError::BatchMismatch(_))
        ));
        assert!(matches!(
            check_batch(&ok, 2, 4),
            Err(EmbeddingError::BatchMismatch(_))
        ));
    }
}
