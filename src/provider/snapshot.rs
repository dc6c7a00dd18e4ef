//! arXiv bulk snapshot reader.
//!
//! The snapshot is a newline-delimited JSON file with one object per paper. It
//! is streamed line by line; nothing beyond the current line is held in memory.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, info};

use super::normalize::{normalize_whitespace, parse_date_arg, parse_date_prefix};
use super::{PaperProvider, ProviderError, ProviderResult};
use crate::models::{PaperRecord, PaperSource, PaperVersion};

/// One line of the snapshot file.
#[derive(Debug, Deserialize)]
struct SnapshotLine {
    id: String,
    title: String,
    #[serde(rename = "abstract")]
    abstract_text: String,
    authors: String,
    update_date: String,
    categories: String,
    #[serde(default)]
    doi: Option<String>,
    #[serde(rename = "journal-ref", default)]
    journal_ref: Option<String>,
    #[serde(default)]
    license: Option<String>,
    #[serde(default)]
    versions: Option<Vec<PaperVersion>>,
    #[serde(default)]
    submitter: Option<String>,
    #[serde(default)]
    comments: Option<String>,
}

impl SnapshotLine {
    fn into_record(self) -> PaperRecord {
        PaperRecord {
            paper_id: self.id,
            source: PaperSource::Arxiv,
            title: self.title,
            abstract_text: normalize_whitespace(&self.abstract_text),
            authors: self.authors,
            update_date: self.update_date,
            categories: self.categories.split_whitespace().map(String::from).collect(),
            doi: self.doi,
            journal_ref: self.journal_ref,
            license: self.license,
            versions: Some(self.versions.unwrap_or_default()),
            submitter: self.submitter,
            comments: self.comments,
        }
    }
}

/// Streams records out of an arXiv metadata snapshot.
///
/// Filters are applied in the order date range, then category, then limit. The
/// file is opened on the first pull, so a missing file surfaces as an
/// [`ProviderError::IoError`] from [`PaperProvider::next_paper`].
pub struct SnapshotFetcher {
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    category: Option<String>,
    limit: usize,
    emitted: usize,
    line_number: usize,
    done: bool,
}

impl fmt::Debug for SnapshotFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotFetcher")
            .field("path", &self.path)
            .field("start_date", &self.start_date)
            .field("end_date", &self.end_date)
            .field("category", &self.category)
            .field("limit", &self.limit)
            .field("emitted", &self.emitted)
            .field("line_number", &self.line_number)
            .finish()
    }
}

impl SnapshotFetcher {
    /// Create a fetcher over `path`.
    ///
    /// Dates are inclusive `YYYY-MM-DD` bounds on each record's update date.
    /// At most `limit` records are yielded.
    pub fn new(
        path: impl Into<PathBuf>,
        start_date: Option<&str>,
        end_date: Option<&str>,
        category: Option<String>,
        limit: usize,
    ) -> ProviderResult<Self> {
        let parse = |s: &str| parse_date_arg(s).map_err(ProviderError::Precondition);
        Ok(Self {
            path: path.into(),
            lines: None,
            start_date: start_date.map(parse).transpose()?,
            end_date: end_date.map(parse).transpose()?,
            category,
            limit,
            emitted: 0,
            line_number: 0,
            done: false,
        })
    }

    /// Snapshot file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn advance(&mut self) -> ProviderResult<Option<PaperRecord>> {
        if self.emitted >= self.limit {
            debug!("Snapshot limit of {} reached", self.limit);
            return Ok(None);
        }

        if self.lines.is_none() {
            info!("Reading arXiv snapshot from {}", self.path.display());
            let file = File::open(&self.path).await?;
            self.lines = Some(BufReader::new(file).lines());
        }
        let Some(lines) = self.lines.as_mut() else {
            return Ok(None);
        };

        while let Some(line) = lines.next_line().await? {
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }

            let raw: SnapshotLine = serde_json::from_str(&line)
                .map_err(|e| ProviderError::parse(Some(self.line_number), e.to_string()))?;

            if self.start_date.is_some() || self.end_date.is_some() {
                let updated = parse_date_prefix(&raw.update_date).ok_or_else(|| {
                    ProviderError::parse(
                        Some(self.line_number),
                        format!("invalid update_date '{}'", raw.update_date),
                    )
                })?;
                if self.start_date.is_some_and(|start| updated < start)
                    || self.end_date.is_some_and(|end| updated > end)
                {
                    continue;
                }
            }

            let record = raw.into_record();
            if let Some(category) = &self.category {
                if !record.categories.iter().any(|c| c == category) {
                    continue;
                }
            }

            self.emitted += 1;
            return Ok(Some(record));
        }

        debug!("Snapshot exhausted after {} lines", self.line_number);
        Ok(None)
    }
}

#[async_trait]
impl PaperProvider for SnapshotFetcher {
    async fn next_paper(&mut self) -> ProviderResult<Option<PaperRecord>> {
        if self.done {
            return Ok(None);
        }
        let result = self.advance().await;
        if !matches!(result, Ok(Some(_))) {
            self.done = true;
            self.lines = None;
        }
        result
    }

    fn name(&self) -> &str {
        "arxiv"
    }
}
