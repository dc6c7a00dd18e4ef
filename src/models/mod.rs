//! Core data models for the paper indexer.
//!
//! This module contains the canonical record every source normalizes into, the
//! provenance tag, and the search result shape returned to callers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One published version of a snapshot paper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaperVersion {
    /// Version label (e.g., "v1")
    pub version: String,

    /// Creation timestamp as given by the snapshot
    pub created: String,
}

/// Provenance tag for a canonical record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaperSource {
    /// arXiv bulk metadata snapshot
    Arxiv,
    /// bioRxiv details API
    Biorxiv,
    /// medRxiv details API
    Medrxiv,
    /// ChemRxiv public API
    Chemrxiv,
}

impl PaperSource {
    /// Lowercase tag stored in the payload and accepted on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaperSource::Arxiv => "arxiv",
            PaperSource::Biorxiv => "biorxiv",
            PaperSource::Medrxiv => "medrxiv",
            PaperSource::Chemrxiv => "chemrxiv",
        }
    }
}

impl fmt::Display for PaperSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaperSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arxiv" => Ok(PaperSource::Arxiv),
            "biorxiv" => Ok(PaperSource::Biorxiv),
            "medrxiv" => Ok(PaperSource::Medrxiv),
            "chemrxiv" => Ok(PaperSource::Chemrxiv),
            other => Err(format!("Unknown source: {}", other)),
        }
    }
}

/// Canonical paper record.
///
/// Every source fetcher produces this shape, and its JSON serialization is the
/// payload stored next to the vector. Field names are the payload keys that
/// the collection indexes and the query filters refer to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaperRecord {
    /// Natural key: snapshot id for arXiv, DOI for the API sources (may be empty)
    pub paper_id: String,

    /// Which source produced this record
    pub source: PaperSource,

    /// Paper title
    pub title: String,

    /// Abstract with internal whitespace runs collapsed
    #[serde(rename = "abstract")]
    pub abstract_text: String,

    /// Free-text author list, format varies by source
    pub authors: String,

    /// ISO-8601 date (or datetime) of the latest update
    pub update_date: String,

    /// Taxonomy tags in source order
    #[serde(default)]
    pub categories: Vec<String>,

    /// Digital Object Identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,

    /// Journal reference (snapshot only in practice)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_ref: Option<String>,

    /// License URL or name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    /// Version history (snapshot only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versions: Option<Vec<PaperVersion>>,

    /// Submitting author (snapshot only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitter: Option<String>,

    /// Submission comments (snapshot only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

impl PaperRecord {
    /// Serialize this record into the JSON object used as a vector payload.
    pub fn to_payload(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            // A struct of strings and vectors always serializes to an object.
            _ => serde_json::Map::new(),
        }
    }

    /// Rebuild a record from a stored payload.
    pub fn from_payload(
        payload: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(payload.clone()))
    }
}

/// Relevance classification for search results.
///
/// Display-only bucket derived from the store's score; it never reorders results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RelevanceLevel {
    /// Extremely high similarity (cosine similarity > 0.95)
    Identical,

    /// Very high similarity (cosine similarity > 0.85)
    HighlySimilar,

    /// Moderate similarity (cosine similarity > 0.70)
    Similar,

    /// Anything lower
    Relevant,
}

impl RelevanceLevel {
    /// Determine relevance level from a cosine similarity score.
    pub fn from_score(score: f32) -> Self {
        if score > 0.95 {
            RelevanceLevel::Identical
        } else if score > 0.85 {
            RelevanceLevel::HighlySimilar
        } else if score > 0.70 {
            RelevanceLevel::Similar
        } else {
            RelevanceLevel::Relevant
        }
    }
}

/// A single search hit: the stored record plus the store's score for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Point id in the vector store
    pub id: u64,

    /// The paper payload
    pub paper: PaperRecord,

    /// Similarity score as reported by the store
    pub score: f32,

    /// Categorical relevance classification
    pub relevance: RelevanceLevel,
}

impl SearchResult {
    /// Create a new search result from a stored point.
    pub fn new(id: u64, paper: PaperRecord, score: f32) -> Self {
        Self {
            id,
            paper,
            score,
            relevance: RelevanceLevel::from_score(score),
        }
    }
}
