//! ChemRxiv public API.
//!
//! `GET {base}/items?limit=..&skip=..[&term=..]` returns an `itemHits` array.
//! Paging stops at the caller's limit, on an empty page, or on a page shorter
//! than the configured page size.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::normalize::{field_text, first_field_text, normalize_whitespace, value_text};
use super::{PaperProvider, ProviderError, ProviderResult};
use crate::config::IndexerConfig;
use crate::http::RetryingHttpClient;
use crate::models::{PaperRecord, PaperSource};

/// Offset-paginated fetcher for ChemRxiv.
#[derive(Debug)]
pub struct OffsetPagedFetcher {
    http: RetryingHttpClient,
    base_url: String,
    search_term: Option<String>,
    limit: usize,
    page_size: usize,
    rate_limit_delay: Duration,
    skip: usize,
    pause: bool,
    done: bool,
    pending: VecDeque<PaperRecord>,
}

impl OffsetPagedFetcher {
    /// Create a fetcher that yields at most `limit` records (up to one page over
    /// if the server ignores the requested page length).
    pub fn new(
        config: &IndexerConfig,
        limit: usize,
        search_term: Option<String>,
    ) -> ProviderResult<Self> {
        if config.sources.chemrxiv_page_size == 0 {
            return Err(ProviderError::ConfigError(
                "chemrxiv_page_size must be positive".to_string(),
            ));
        }
        let http = RetryingHttpClient::from_config(&config.http)
            .map_err(|e| ProviderError::ConfigError(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.sources.chemrxiv_base_url.trim_end_matches('/').to_string(),
            search_term: search_term.filter(|t| !t.is_empty()),
            limit,
            page_size: config.sources.chemrxiv_page_size,
            rate_limit_delay: config.http.rate_limit_delay(),
            skip: 0,
            pause: false,
            done: false,
            pending: VecDeque::new(),
        })
    }

    /// Current offset into the result set.
    pub fn offset(&self) -> usize {
        self.skip
    }

    async fn fetch_page(&mut self) -> ProviderResult<()> {
        let url = format!("{}/items", self.base_url);
        let requested = self.page_size.min(self.limit - self.skip);
        let mut params = vec![
            ("limit".to_string(), requested.to_string()),
            ("skip".to_string(), self.skip.to_string()),
        ];
        if let Some(term) = &self.search_term {
            params.push(("term".to_string(), term.clone()));
        }

        debug!("Fetching chemrxiv page at skip {} (limit {})", self.skip, requested);
        let body: Value = self.http.get_json(&url, &params).await.map_err(|e| {
            warn!("Giving up on chemrxiv at skip {}: {}", self.skip, e);
            ProviderError::FetchAborted {
                source_name: "chemrxiv".to_string(),
                message: e.to_string(),
            }
        })?;

        let hits = body
            .get("itemHits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if hits.is_empty() {
            self.done = true;
            return Ok(());
        }

        let returned = hits.len();
        for hit in &hits {
            self.pending.push_back(normalize_item(hit)?);
        }

        self.skip += returned;
        if returned < self.page_size {
            self.done = true;
        } else {
            self.pause = true;
        }
        Ok(())
    }
}

#[async_trait]
impl PaperProvider for OffsetPagedFetcher {
    async fn next_paper(&mut self) -> ProviderResult<Option<PaperRecord>> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Ok(Some(record));
            }
            if self.done || self.skip >= self.limit {
                if !self.done {
                    info!("Reached chemrxiv limit of {}", self.limit);
                    self.done = true;
                }
                return Ok(None);
            }

            if self.pause {
                tokio::time::sleep(self.rate_limit_delay).await;
            }
            if let Err(e) = self.fetch_page().await {
                self.done = true;
                self.pending.clear();
                return Err(e);
            }
        }
    }

    fn name(&self) -> &str {
        "chemrxiv"
    }
}

/// Map one `itemHits` entry onto the canonical shape.
fn normalize_item(hit: &Value) -> ProviderResult<PaperRecord> {
    let item = hit
        .get("item")
        .filter(|v| v.is_object())
        .unwrap_or(hit)
        .as_object()
        .ok_or_else(|| ProviderError::parse(None, "chemrxiv item is not an object"))?;

    let doi = field_text(item, "doi");
    Ok(PaperRecord {
        paper_id: doi.clone(),
        source: PaperSource::Chemrxiv,
        title: field_text(item, "title"),
        abstract_text: normalize_whitespace(&first_field_text(item, &["description", "abstract"])),
        authors: author_names(item),
        update_date: field_text(item, "publishedDate"),
        categories: named_entries(item.get("categories")),
        doi: Some(doi),
        journal_ref: None,
        license: item
            .get("license")
            .and_then(Value::as_object)
            .and_then(|license| license.get("name"))
            .and_then(value_text),
        versions: None,
        submitter: None,
        comments: None,
    })
}

fn author_names(item: &Map<String, Value>) -> String {
    match item.get("authors") {
        Some(Value::Array(authors)) => authors
            .iter()
            .map(|author| match author {
                Value::Object(author) => match author.get("name").and_then(value_text) {
                    Some(name) => name,
                    None => {
                        let first = author
                            .get("firstName")
                            .and_then(value_text)
                            .unwrap_or_default();
                        let last = author
                            .get("lastName")
                            .and_then(value_text)
                            .unwrap_or_default();
                        format!("{} {}", first, last).trim().to_string()
                    }
                },
                other => value_text(other).unwrap_or_default(),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => value_text(other).unwrap_or_default(),
        None => String::new(),
    }
}

fn named_entries(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get("name").and_then(value_text))
                .filter(|name| !name.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn test_config(base_url: &str, page_size: usize) -> IndexerConfig {
        let mut config = IndexerConfig::default();
        config.sources.chemrxiv_base_url = base_url.to_string();
        config.sources.chemrxiv_page_size = page_size;
        config.http.max_retries = 1;
        config.http.backoff_factor = 0.0;
        config.http.rate_limit_delay_secs = 0.0;
        config
    }

    fn hit(n: usize) -> Value {
        json!({
            "item": {
                "doi": format!("10.26434/chemrxiv-{}", n),
                "title": format!("Compound {}", n),
                "description": "A  new\ncatalyst.",
                "authors": [{"name": "Ada Lovelace"}, {"firstName": "Marie", "lastName": "Curie"}],
                "publishedDate": "2024-02-01T00:00:00.000Z",
                "categories": [{"name": "Catalysis"}, {"name": ""}, {"id": 3}],
                "license": {"name": "CC BY 4.0"},
            }
        })
    }

    fn page(range: std::ops::Range<usize>) -> Value {
        json!({ "itemHits": range.map(hit).collect::<Vec<_>>() })
    }

    #[test]
    fn test_item_normalization() {
        let record = normalize_item(&hit(1)).unwrap();
        assert_eq!(record.paper_id, "10.26434/chemrxiv-1");
        assert_eq!(record.abstract_text, "A new catalyst.");
        assert_eq!(record.authors, "Ada Lovelace, Marie Curie");
        assert_eq!(record.categories, vec!["Catalysis"]);
        assert_eq!(record.license.as_deref(), Some("CC BY 4.0"));
        assert_eq!(record.update_date, "2024-02-01T00:00:00.000Z");
    }

    #[test]
    fn test_unwrapped_item_and_abstract_fallback() {
        let record = normalize_item(&json!({
            "doi": "10.1/x",
            "abstract": "fallback",
            "license": "not-an-object",
        }))
        .unwrap();
        assert_eq!(record.abstract_text, "fallback");
        assert_eq!(record.authors, "");
        assert_eq!(record.license, None);
    }

    #[tokio::test]
    async fn test_short_page_stops_without_extra_request() {
        let server = MockServer::start_async().await;
        let first = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/items")
                    .query_param("skip", "0")
                    .query_param("limit", "2")
                    .query_param("term", "catalyst");
                then.status(200).json_body(page(0..2));
            })
            .await;
        let second = server
            .mock_async(|when, then| {
                when.method(GET).path("/items").query_param("skip", "2");
                then.status(200).json_body(page(2..3));
            })
            .await;
        let third = server
            .mock_async(|when, then| {
                when.method(GET).path("/items").query_param("skip", "3");
                then.status(200).json_body(page(3..5));
            })
            .await;

        let config = test_config(&server.base_url(), 2);
        let mut fetcher =
            OffsetPagedFetcher::new(&config, 100, Some("catalyst".to_string())).unwrap();

        let papers = fetcher.collect_papers().await.unwrap();
        assert_eq!(papers.len(), 3);
        assert_eq!(fetcher.offset(), 3);
        first.assert_hits_async(1).await;
        second.assert_hits_async(1).await;
        third.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn test_limit_caps_requested_page_length() {
        let server = MockServer::start_async().await;
        let first = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/items")
                    .query_param("skip", "0")
                    .query_param("limit", "3");
                then.status(200).json_body(page(0..3));
            })
            .await;
        let second = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/items")
                    .query_param("skip", "3")
                    .query_param("limit", "2");
                then.status(200).json_body(page(3..5));
            })
            .await;

        let config = test_config(&server.base_url(), 3);
        let mut fetcher = OffsetPagedFetcher::new(&config, 5, None).unwrap();

        let ids: Vec<String> = fetcher
            .collect_papers()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.paper_id)
            .collect();
        assert_eq!(ids.len(), 5);
        assert_eq!(ids[4], "10.26434/chemrxiv-4");
        first.assert_hits_async(1).await;
        second.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_zero_limit_sends_nothing() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/items");
                then.status(200).json_body(page(0..1));
            })
            .await;

        let config = test_config(&server.base_url(), 10);
        let mut fetcher = OffsetPagedFetcher::new(&config, 0, None).unwrap();
        assert!(fetcher.next_paper().await.unwrap().is_none());
        mock.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn test_http_failure_aborts_fetch() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/items");
                then.status(502);
            })
            .await;

        let config = test_config(&server.base_url(), 10);
        let mut fetcher = OffsetPagedFetcher::new(&config, 50, None).unwrap();
        assert!(matches!(
            fetcher.next_paper().await,
            Err(ProviderError::FetchAborted { .. })
        ));
        assert!(fetcher.next_paper().await.unwrap().is_none());
    }
}
