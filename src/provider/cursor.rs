//! bioRxiv / medRxiv publication API.
//!
//! Pages are addressed as `{base}/pubs/{server}/{start}/{end}/{cursor}`. The
//! response's `messages` array may carry an entry of type `cursor_value` with
//! the cursor of the next page; when it is absent the current page is the last.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::normalize::{
    field_text, non_empty, normalize_whitespace, optional_field_text, parse_date_arg,
};
use super::{PaperProvider, PreprintServer, ProviderError, ProviderResult};
use crate::config::IndexerConfig;
use crate::http::RetryingHttpClient;
use crate::models::{PaperRecord, PaperSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// Fetch the page at `cursor`; `pause` applies the inter-page delay first
    Fetch { cursor: u64, pause: bool },
    Done,
}

/// Cursor-paginated fetcher for bioRxiv and medRxiv.
#[derive(Debug)]
pub struct CursorPagedFetcher {
    http: RetryingHttpClient,
    base_url: String,
    server: PreprintServer,
    start_date: String,
    end_date: String,
    category: Option<String>,
    rate_limit_delay: Duration,
    state: CursorState,
    pending: VecDeque<PaperRecord>,
    pages_fetched: usize,
}

impl CursorPagedFetcher {
    /// Create a fetcher for `server` over the inclusive date range.
    ///
    /// Both dates are required; a missing or malformed date is a
    /// [`ProviderError::Precondition`] and no request is sent.
    pub fn new(
        config: &IndexerConfig,
        server: PreprintServer,
        start_date: Option<&str>,
        end_date: Option<&str>,
        category: Option<String>,
    ) -> ProviderResult<Self> {
        let (start_date, end_date) = match (start_date, end_date) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                return Err(ProviderError::Precondition(format!(
                    "{} requires both a start and an end date",
                    server
                )))
            }
        };
        parse_date_arg(start_date).map_err(ProviderError::Precondition)?;
        parse_date_arg(end_date).map_err(ProviderError::Precondition)?;

        let http = RetryingHttpClient::from_config(&config.http)
            .map_err(|e| ProviderError::ConfigError(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.sources.biorxiv_base_url.trim_end_matches('/').to_string(),
            server,
            start_date: start_date.to_string(),
            end_date: end_date.to_string(),
            category,
            rate_limit_delay: config.http.rate_limit_delay(),
            state: CursorState::Fetch {
                cursor: 0,
                pause: false,
            },
            pending: VecDeque::new(),
            pages_fetched: 0,
        })
    }

    /// Number of pages requested so far.
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    fn page_url(&self, cursor: u64) -> String {
        format!(
            "{}/pubs/{}/{}/{}/{}",
            self.base_url, self.server, self.start_date, self.end_date, cursor
        )
    }

    async fn fetch_page(&mut self, cursor: u64) -> ProviderResult<()> {
        let url = self.page_url(cursor);
        let mut params = Vec::new();
        if let Some(category) = &self.category {
            params.push(("category".to_string(), category.clone()));
        }

        debug!("Fetching {} page at cursor {}", self.server, cursor);
        let body: Value = match self.http.get_json(&url, &params).await {
            Ok(body) => body,
            Err(e) => {
                warn!("Giving up on {} at cursor {}: {}", self.server, cursor, e);
                self.state = CursorState::Done;
                return Err(ProviderError::FetchAborted {
                    source_name: self.server.to_string(),
                    message: e.to_string(),
                });
            }
        };
        self.pages_fetched += 1;

        let collection = body
            .get("collection")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if collection.is_empty() {
            debug!("Empty page from {}; stopping", self.server);
            self.state = CursorState::Done;
            return Ok(());
        }

        let source = self.server.source();
        for item in &collection {
            let record = normalize_preprint(item, source)?;
            self.pending.push_back(record);
        }

        self.state = match next_cursor(&body)? {
            Some(next) => CursorState::Fetch {
                cursor: next,
                pause: true,
            },
            None => CursorState::Done,
        };
        Ok(())
    }
}

#[async_trait]
impl PaperProvider for CursorPagedFetcher {
    async fn next_paper(&mut self) -> ProviderResult<Option<PaperRecord>> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Ok(Some(record));
            }

            match self.state {
                CursorState::Done => return Ok(None),
                CursorState::Fetch { cursor, pause } => {
                    if pause {
                        tokio::time::sleep(self.rate_limit_delay).await;
                    }
                    if let Err(e) = self.fetch_page(cursor).await {
                        self.state = CursorState::Done;
                        self.pending.clear();
                        return Err(e);
                    }
                    if self.state == CursorState::Done && self.pending.is_empty() {
                        info!(
                            "Finished {} after {} pages",
                            self.server, self.pages_fetched
                        );
                    }
                }
            }
        }
    }

    fn name(&self) -> &str {
        self.server.as_str()
    }
}

/// Cursor carried by the `cursor_value` message, if any.
fn next_cursor(body: &Value) -> ProviderResult<Option<u64>> {
    let message = body
        .get("messages")
        .and_then(Value::as_array)
        .and_then(|messages| {
            messages
                .iter()
                .find(|m| m.get("type").and_then(Value::as_str) == Some("cursor_value"))
        });

    let Some(message) = message else {
        return Ok(None);
    };

    let cursor = match message.get("cursor") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    cursor.map(Some).ok_or_else(|| {
        ProviderError::parse(None, format!("invalid cursor_value message: {}", message))
    })
}

/// Map one API record onto the canonical shape.
fn normalize_preprint(item: &Value, source: PaperSource) -> ProviderResult<PaperRecord> {
    let record = item
        .as_object()
        .ok_or_else(|| ProviderError::parse(None, format!("{} record is not an object", source)))?;

    let doi = field_text(record, "doi");
    let category = field_text(record, "category");
    Ok(PaperRecord {
        paper_id: doi.clone(),
        source,
        title: field_text(record, "title"),
        abstract_text: normalize_whitespace(&field_text(record, "abstract")),
        authors: field_text(record, "authors"),
        update_date: field_text(record, "date"),
        categories: non_empty(category).into_iter().collect(),
        doi: Some(doi),
        journal_ref: None,
        license: optional_field_text(record, "license"),
        versions: None,
        submitter: None,
        comments: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn test_config(base_url: &str) -> IndexerConfig {
        let mut config = IndexerConfig::default();
        config.sources.biorxiv_base_url = base_url.to_string();
        config.http.max_retries = 2;
        config.http.backoff_factor = 0.0;
        config.http.rate_limit_delay_secs = 0.0;
        config
    }

    fn item(doi: &str) -> Value {
        json!({
            "doi": doi,
            "title": format!("Title {}", doi),
            "authors": "Smith, J.; Doe, A.",
            "date": "2024-01-01",
            "category": "neuroscience",
            "abstract": "Line one.\n\n  Line   two.",
            "license": "cc_by",
        })
    }

    #[test]
    fn test_normalize_prefers_prefixed_fields() {
        let record = normalize_preprint(
            &json!({
                "preprint_doi": "10.1/x",
                "doi": "10.1/y",
                "preprint_title": null,
                "title": "T",
            }),
            PaperSource::Medrxiv,
        )
        .unwrap();
        assert_eq!(record.paper_id, "10.1/x");
        assert_eq!(record.title, "T");
        assert_eq!(record.source, PaperSource::Medrxiv);
        assert!(record.categories.is_empty());
        assert_eq!(record.license, None);
    }

    #[test]
    fn test_non_object_record_is_a_parse_error() {
        let result = normalize_preprint(&json!("oops"), PaperSource::Biorxiv);
        assert!(matches!(result, Err(ProviderError::ParseError { .. })));
    }

    #[test]
    fn test_missing_dates_rejected_before_any_request() {
        let config = test_config("http://127.0.0.1:9");
        let result = CursorPagedFetcher::new(
            &config,
            PreprintServer::Biorxiv,
            Some("2024-01-01"),
            None,
            None,
        );
        assert!(matches!(result, Err(ProviderError::Precondition(_))));
    }

    #[tokio::test]
    async fn test_follows_cursor_until_message_absent() {
        let server = MockServer::start_async().await;
        let first = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/pubs/biorxiv/2024-01-01/2024-01-02/0")
                    .query_param("category", "neuroscience");
                then.status(200).json_body(json!({
                    "messages": [{"type": "cursor_value", "cursor": 2}],
                    "collection": [item("10.1101/a"), item("10.1101/b")],
                }));
            })
            .await;
        let second = server
            .mock_async(|when, then| {
                when.method(GET).path("/pubs/biorxiv/2024-01-01/2024-01-02/2");
                then.status(200).json_body(json!({
                    "messages": [{"status": "ok"}],
                    "collection": [item("10.1101/c")],
                }));
            })
            .await;

        let config = test_config(&server.base_url());
        let mut fetcher = CursorPagedFetcher::new(
            &config,
            PreprintServer::Biorxiv,
            Some("2024-01-01"),
            Some("2024-01-02"),
            Some("neuroscience".to_string()),
        )
        .unwrap();

        let papers = fetcher.collect_papers().await.unwrap();
        let ids: Vec<&str> = papers.iter().map(|p| p.paper_id.as_str()).collect();
        assert_eq!(ids, vec!["10.1101/a", "10.1101/b", "10.1101/c"]);
        assert_eq!(papers[0].abstract_text, "Line one. Line two.");
        assert_eq!(papers[0].categories, vec!["neuroscience"]);
        assert_eq!(papers[0].license.as_deref(), Some("cc_by"));

        first.assert_hits_async(1).await;
        second.assert_hits_async(1).await;
        assert_eq!(fetcher.pages_fetched(), 2);
    }

    #[tokio::test]
    async fn test_empty_collection_ends_without_error() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/pubs/medrxiv/2024-01-01/2024-01-02/0");
                then.status(200).json_body(json!({
                    "messages": [{"type": "cursor_value", "cursor": 100}],
                    "collection": [],
                }));
            })
            .await;

        let config = test_config(&server.base_url());
        let mut fetcher = CursorPagedFetcher::new(
            &config,
            PreprintServer::Medrxiv,
            Some("2024-01-01"),
            Some("2024-01-02"),
            None,
        )
        .unwrap();

        assert!(fetcher.next_paper().await.unwrap().is_none());
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_failed_page_aborts_after_earlier_records() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/pubs/biorxiv/2024-01-01/2024-01-02/0");
                then.status(200).json_body(json!({
                    "messages": [{"type": "cursor_value", "cursor": "1"}],
                    "collection": [item("10.1101/a")],
                }));
            })
            .await;
        let failing = server
            .mock_async(|when, then| {
                when.method(GET).path("/pubs/biorxiv/2024-01-01/2024-01-02/1");
                then.status(500);
            })
            .await;

        let config = test_config(&server.base_url());
        let mut fetcher = CursorPagedFetcher::new(
            &config,
            PreprintServer::Biorxiv,
            Some("2024-01-01"),
            Some("2024-01-02"),
            None,
        )
        .unwrap();

        assert_eq!(
            fetcher.next_paper().await.unwrap().map(|p| p.paper_id),
            Some("10.1101/a".to_string())
        );
        assert!(matches!(
            fetcher.next_paper().await,
            Err(ProviderError::FetchAborted { .. })
        ));
        assert!(fetcher.next_paper().await.unwrap().is_none());
        failing.assert_hits_async(2).await;
    }

    #[test]
    fn test_cursor_message_parsing() {
        assert_eq!(next_cursor(&json!({})).unwrap(), None);
        assert_eq!(
            next_cursor(&json!({"messages": [{"type": "cursor_value", "cursor": 30}]})).unwrap(),
            Some(30)
        );
        assert!(next_cursor(&json!({"messages": [{"type": "cursor_value"}]})).is_err());
    }
}
