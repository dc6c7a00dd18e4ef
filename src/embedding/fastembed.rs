//! FastEmbed embedding provider implementation.
//!
//! Runs the embedding model locally through the fastembed library. The model
//! handle is not thread-safe, so calls are serialized behind an async mutex;
//! batches are still embedded in a single call so the model can use its own
//! internal batching.

use super::{
    check_batch, DocumentInput, EmbeddingError, EmbeddingProvider, EmbeddingResult,
    PromptTemplates,
};
use crate::config::EmbeddingSettings;
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Model used when none is configured.
pub const DEFAULT_MODEL: EmbeddingModel = EmbeddingModel::AllMiniLML6V2;

/// FastEmbed embedding provider.
#[derive(Clone)]
pub struct FastEmbedProvider {
    /// The embedding model instance (wrapped in Arc<Mutex> for thread-safety)
    model: Arc<Mutex<TextEmbedding>>,

    /// Model identifier
    model_name: String,

    /// Expected dimension of the embedding vectors
    embedding_dimension: usize,

    /// Texts per forward pass
    batch_size: usize,

    /// Document and query prompts
    templates: PromptTemplates,
}

impl FastEmbedProvider {
    /// Create a new FastEmbed embedding provider.
    ///
    /// # Arguments
    /// * `model` - Model to load
    /// * `cache_dir` - Directory for downloaded model files
    /// * `batch_size` - Texts per forward pass
    /// * `templates` - Prompt templates for documents and queries
    ///
    /// # Errors
    /// Returns `EmbeddingError::ConfigError` if model initialization fails
    pub fn new(
        model: EmbeddingModel,
        cache_dir: PathBuf,
        batch_size: usize,
        templates: PromptTemplates,
    ) -> EmbeddingResult<Self> {
        let model_name = format!("{:?}", model);
        let embedding_dimension = model_dimension(&model);

        info!(
            "Loading embedding model {} (cache: {})",
            model_name,
            cache_dir.display()
        );
        let init_options = InitOptions::new(model).with_cache_dir(cache_dir);
        let text_embedding = TextEmbedding::try_new(init_options).map_err(|e| {
            EmbeddingError::ConfigError(format!("Failed to initialize FastEmbed model: {}", e))
        })?;

        Ok(Self {
            model: Arc::new(Mutex::new(text_embedding)),
            model_name,
            embedding_dimension,
            batch_size: batch_size.max(1),
            templates,
        })
    }

    /// Create a provider from the embedding section of the configuration.
    pub fn from_config(settings: &EmbeddingSettings) -> EmbeddingResult<Self> {
        let model = match settings.model.as_deref() {
            Some(name) => parse_model(name)?,
            None => DEFAULT_MODEL,
        };
        Self::new(
            model,
            settings.resolved_cache_dir(),
            settings.batch_size,
            PromptTemplates::from_settings(settings),
        )
    }

    async fn embed_texts(&self, texts: Vec<String>) -> EmbeddingResult<Vec<Vec<f32>>> {
        let expected = texts.len();
        let mut model = self.model.lock().await;
        let embeddings = model
            .embed(texts, Some(self.batch_size))
            .map_err(|e| {
                EmbeddingError::ModelError(format!("Embedding generation failed: {}", e))
            })?;
        check_batch(&embeddings, expected, self.embedding_dimension)?;
        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_documents(&self, docs: &[DocumentInput<'_>]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if docs.is_empty() {
            return Ok(vec![]);
        }
        let prompts: Vec<String> = docs
            .iter()
            .map(|doc| self.templates.render_document(doc))
            .collect();
        debug!("Embedding {} documents with {}", prompts.len(), self.model_name);
        self.embed_texts(prompts).await
    }

    async fn embed_query(&self, query: &str) -> EmbeddingResult<Vec<f32>> {
        if query.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Query cannot be empty".to_string()));
        }
        let prompt = self.templates.render_query(query);
        self.embed_texts(vec![prompt])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::ModelError("No embedding generated".to_string()))
    }

    fn dimension(&self) -> usize {
        self.embedding_dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

// TextEmbedding does not implement Debug
impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("model_name", &self.model_name)
            .field("embedding_dimension", &self.embedding_dimension)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

/// Resolve a configured model name (case-insensitive, as printed by `{:?}`).
pub fn parse_model(name: &str) -> EmbeddingResult<EmbeddingModel> {
    let model = match name.trim().to_ascii_lowercase().as_str() {
        "allminilml6v2" => EmbeddingModel::AllMiniLML6V2,
        "bgesmallenv15" => EmbeddingModel::BGESmallENV15,
        "bgebaseenv15" => EmbeddingModel::BGEBaseENV15,
        "bgelargeenv15" => EmbeddingModel::BGELargeENV15,
        "nomicembedtextv1" => EmbeddingModel::NomicEmbedTextV1,
        "nomicembedtextv15" => EmbeddingModel::NomicEmbedTextV15,
        "paraphrasemlminilml12v2" => EmbeddingModel::ParaphraseMLMiniLML12V2,
        "paraphrasemlmpnetbasev2" => EmbeddingModel::ParaphraseMLMpnetBaseV2,
        other => {
            return Err(EmbeddingError::ConfigError(format!(
                "Unknown embedding model: {}",
                other
            )))
        }
    };
    Ok(model)
}

/// Output dimension of the supported models.
pub fn model_dimension(model: &EmbeddingModel) -> usize {
    match model {
        EmbeddingModel::AllMiniLML6V2 => 384,
        EmbeddingModel::BGESmallENV15 => 384,
        EmbeddingModel::BGEBaseENV15 => 768,
        EmbeddingModel::BGELargeENV15 => 1024,
        EmbeddingModel::NomicEmbedTextV1 => 768,
        EmbeddingModel::NomicEmbedTextV15 => 768,
        EmbeddingModel::ParaphraseMLMiniLML12V2 => 384,
        EmbeddingModel::ParaphraseMLMpnetBaseV2 => 768,
        _ => 384,
    }
}
