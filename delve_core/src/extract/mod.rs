//! Page fetching and readable-text extraction.

mod fetch;
mod strategy;

pub use fetch::{FetchedPage, HttpFetcher, PageFetcher};
pub use strategy::{
    extract_title, normalize_text, ExtractionStrategy, ReadableStrategy, TextDumpStrategy,
    TRUNCATION_MARKER,
};

use crate::config::ResearchConfig;
use crate::cpu_pool::spawn_cpu;
use crate::error::FetchError;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use scraper::Html;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    Primary,
    Fallback,
}

/// Outcome of one extraction attempt. Failures carry empty content and a reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedContent {
    pub url: String,
    pub content: String,
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_method: Option<ExtractionMethod>,
    pub fetched_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScrapedContent {
    fn failed(url: &str, reason: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            content: String::new(),
            title: None,
            extraction_method: None,
            fetched_at: Utc::now(),
            error: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.content.is_empty()
    }
}

pub struct ContentExtractor {
    fetcher: Arc<dyn PageFetcher>,
    primary: Arc<dyn ExtractionStrategy>,
    fallback: Arc<dyn ExtractionStrategy>,
    max_content_length: usize,
    max_concurrent: usize,
}

impl ContentExtractor {
    pub fn new(fetcher: Arc<dyn PageFetcher>, max_content_length: usize, max_concurrent: usize) -> Self {
        Self {
            fetcher,
            primary: Arc::new(ReadableStrategy),
            fallback: Arc::new(TextDumpStrategy),
            max_content_length,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn from_config(config: &ResearchConfig) -> Result<Self, FetchError> {
        let fetcher = HttpFetcher::new(config.scraper_timeout())?;
        Ok(Self::new(
            Arc::new(fetcher),
            config.max_content_length,
            config.max_concurrent_scrapes,
        ))
    }

    /// Swap the extraction strategies.
    pub fn with_strategies(
        mut self,
        primary: Arc<dyn ExtractionStrategy>,
        fallback: Arc<dyn ExtractionStrategy>,
    ) -> Self {
        self.primary = primary;
        self.fallback = fallback;
        self
    }

    /// Fetch and extract one page. Never fails: problems are recorded on the result.
    pub async fn extract(&self, url: &str) -> ScrapedContent {
        let started = Instant::now();
        let page = match self.fetcher.fetch(url).await {
            Ok(page) => page,
            Err(err) => {
                debug!(target: "delve.extract", url = %url, error = %err, "fetch failed");
                return ScrapedContent::failed(url, err.to_string());
            }
        };

        let primary = Arc::clone(&self.primary);
        let fallback = Arc::clone(&self.fallback);
        let max_len = self.max_content_length;
        let body = page.body;
        let parsed = spawn_cpu(move || {
            let document = Html::parse_document(&body);
            let title = extract_title(&document);
            let text = normalize_text(&primary.extract(&document), max_len);
            if !text.is_empty() {
                return (title, text, Some(ExtractionMethod::Primary));
            }
            let text = normalize_text(&fallback.extract(&document), max_len);
            let method = (!text.is_empty()).then_some(ExtractionMethod::Fallback);
            (title, text, method)
        })
        .await;

        let (title, content, method) = match parsed {
            Ok(parts) => parts,
            Err(err) => {
                info!(target: "delve.extract", url = %url, error = %err, "extraction task failed");
                return ScrapedContent::failed(url, err.to_string());
            }
        };

        debug!(
            target: "delve.extract",
            url = %url,
            method = ?method,
            content_chars = content.chars().count(),
            total_ms = %started.elapsed().as_millis(),
            "extracted page"
        );

        ScrapedContent {
            url: url.to_string(),
            error: method.is_none().then(|| "no readable content".to_string()),
            content,
            title,
            extraction_method: method,
            fetched_at: Utc::now(),
        }
    }

    /// Extract many pages with at most `max_concurrent` fetches in flight.
    ///
    /// Cancellation is checked before each fetch starts; URLs skipped that way
    /// produce no entry. `on_progress` runs in the caller's task once per
    /// finished URL, in completion order. The returned list keeps input order.
    pub async fn extract_many<F>(
        &self,
        urls: &[String],
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Vec<ScrapedContent>
    where
        F: FnMut(&ScrapedContent),
    {
        let semaphore = Semaphore::new(self.max_concurrent);
        let semaphore = &semaphore;
        let mut pending: FuturesUnordered<_> = urls
            .iter()
            .enumerate()
            .map(|(idx, url)| async move {
                let _permit = semaphore.acquire().await.ok()?;
                if cancel.is_cancelled() {
                    debug!(target: "delve.extract", url = %url, "cancelled before fetch");
                    return None;
                }
                Some((idx, self.extract(url).await))
            })
            .collect();

        let mut finished = Vec::with_capacity(urls.len());
        while let Some(item) = pending.next().await {
            if let Some((idx, scraped)) = item {
                on_progress(&scraped);
                finished.push((idx, scraped));
            }
        }
        finished.sort_by_key(|(idx, _)| *idx);

        let succeeded = finished.iter().filter(|(_, s)| s.is_success()).count();
        info!(
            target: "delve.extract",
            requested = urls.len(),
            attempted = finished.len(),
            succeeded,
            "batch extraction finished"
        );
        finished.into_iter().map(|(_, s)| s).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StaticFetcher {
        pages: HashMap<String, Result<String, FetchError>>,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl StaticFetcher {
        fn new<S: Into<String>>(pages: Vec<(S, Result<&str, FetchError>)>) -> Self {
            Self {
                pages: pages
                    .into_iter()
                    .map(|(u, r)| (u.into(), r.map(str::to_string)))
                    .collect(),
                delay: Duration::from_millis(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PageFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let body = self
                .pages
                .get(url)
                .cloned()
                .unwrap_or(Err(FetchError::Status(404)))?;
            Ok(FetchedPage {
                url: url.to_string(),
                status: 200,
                content_type: Some("text/html".into()),
                body,
            })
        }
    }

    const ARTICLE: &str = "<html><head><title>Budget</title></head><body><nav>Menu</nav><article><p>The finance ministry published its spring forecast on Tuesday, revising growth down for the second time this year as exports weakened further.</p></article></body></html>";
    const BARE: &str = "<html><body><span>Just a short line</span></body></html>";

    fn extractor(fetcher: StaticFetcher, max_len: usize, max_concurrent: usize) -> ContentExtractor {
        ContentExtractor::new(Arc::new(fetcher), max_len, max_concurrent)
    }

    #[tokio::test]
    async fn primary_strategy_is_used_for_articles() {
        let ex = extractor(StaticFetcher::new(vec![("https://a.com", Ok(ARTICLE))]), 3000, 2);
        let scraped = ex.extract("https://a.com").await;
        assert!(scraped.is_success());
        assert_eq!(scraped.extraction_method, Some(ExtractionMethod::Primary));
        assert_eq!(scraped.title.as_deref(), Some("Budget"));
        assert!(!scraped.content.contains("Menu"));
    }

    #[tokio::test]
    async fn fallback_strategy_covers_pages_without_structure() {
        let ex = extractor(StaticFetcher::new(vec![("https://b.com", Ok(BARE))]), 3000, 2);
        let scraped = ex.extract("https://b.com").await;
        assert_eq!(scraped.extraction_method, Some(ExtractionMethod::Fallback));
        assert_eq!(scraped.content, "Just a short line");
        assert_eq!(scraped.title, None);
    }

    #[tokio::test]
    async fn fetch_errors_become_empty_content() {
        let ex = extractor(
            StaticFetcher::new(vec![("https://c.com", Err(FetchError::Status(403)))]),
            3000,
            2,
        );
        let scraped = ex.extract("https://c.com").await;
        assert_eq!(scraped.content, "");
        assert_eq!(scraped.extraction_method, None);
        assert_eq!(scraped.error.as_deref(), Some("HTTP status 403"));
    }

    #[tokio::test]
    async fn content_is_truncated() {
        let ex = extractor(StaticFetcher::new(vec![("https://a.com", Ok(ARTICLE))]), 50, 2);
        let scraped = ex.extract("https://a.com").await;
        assert_eq!(scraped.content.chars().count(), 50);
        assert!(scraped.content.ends_with(TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn batch_respects_concurrency_and_keeps_order() {
        let mut fetcher = StaticFetcher::new(
            (0..10)
                .map(|i| (format!("https://s{i}.com"), Ok(ARTICLE)))
                .collect(),
        );
        fetcher.delay = Duration::from_millis(20);
        let fetcher = Arc::new(fetcher);
        let ex = ContentExtractor::new(fetcher.clone(), 3000, 3);

        let urls: Vec<String> = (0..10).map(|i| format!("https://s{i}.com")).collect();
        let mut progress = 0;
        let results = ex
            .extract_many(&urls, &CancellationToken::new(), |_| progress += 1)
            .await;

        assert_eq!(results.len(), 10);
        assert_eq!(progress, 10);
        assert!(fetcher.peak.load(Ordering::SeqCst) <= 3);
        let got: Vec<&str> = results.iter().map(|r| r.url.as_str()).collect();
        let want: Vec<&str> = urls.iter().map(String::as_str).collect();
        assert_eq!(got, want);
    }

    #[tokio::test]
    async fn one_failure_does_not_sink_the_batch() {
        let ex = extractor(
            StaticFetcher::new(vec![
                ("https://ok.com", Ok(ARTICLE)),
                ("https://bad.com", Err(FetchError::Timeout(10))),
            ]),
            3000,
            2,
        );
        let urls = vec!["https://ok.com".to_string(), "https://bad.com".to_string()];
        let results = ex.extract_many(&urls, &CancellationToken::new(), |_| {}).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_success());
        assert!(!results[1].is_success());
    }

    #[tokio::test]
    async fn cancelled_batch_skips_unstarted_urls() {
        let ex = extractor(StaticFetcher::new(Vec::<(String, _)>::new()), 3000, 1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let urls = vec!["https://a.com".to_string(), "https://b.com".to_string()];
        let results = ex.extract_many(&urls, &cancel, |_| {}).await;
        assert!(results.is_empty());
    }
}
