//! Web search with provider failover.
//!
//! This module provides:
//! - `SearchProvider`: one web search backend (Serper, DuckDuckGo, test fakes)
//! - `SearchEngine`: tries the preferred provider and transparently fails over
//! - `aggregate_sources`: per-domain counts over already-fetched results
//!
//! # Example
//!
//! ```ignore
//! use delve_core::search::SearchEngine;
//!
//! let engine = SearchEngine::from_config(&config)?;
//! let results = engine.search("small-cap valuations", 10, "us-en").await;
//! ```

mod duckduckgo;
mod serper;
mod types;

pub use duckduckgo::DuckDuckGoSearchProvider;
pub use serper::SerperSearchProvider;
pub use types::{SearchResult, SourceCount};

use crate::config::{EnginePreference, ResearchConfig};
use crate::error::SearchError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Short provider name used in logs.
    fn name(&self) -> &'static str;

    /// Whether the provider has what it needs (credentials) to be tried at all.
    fn is_configured(&self) -> bool {
        true
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        region: &str,
    ) -> Result<Vec<SearchResult>, SearchError>;
}

/// Bounded exponential backoff applied to rate-limit responses.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound on any single wait, including a server's `Retry-After`.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1));
        retry_after.unwrap_or(backoff).min(self.max_delay)
    }
}

/// Seconds from a `Retry-After` header. The HTTP-date form is ignored.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Unified search interface over a primary and a secondary provider.
pub struct SearchEngine {
    primary: Arc<dyn SearchProvider>,
    secondary: Arc<dyn SearchProvider>,
    preference: EnginePreference,
    retry: RetryPolicy,
}

impl SearchEngine {
    pub fn new(
        primary: Arc<dyn SearchProvider>,
        secondary: Arc<dyn SearchProvider>,
        preference: EnginePreference,
    ) -> Self {
        Self {
            primary,
            secondary,
            preference,
            retry: RetryPolicy::default(),
        }
    }

    /// Serper as primary, DuckDuckGo as secondary.
    pub fn from_config(config: &ResearchConfig) -> Result<Self, SearchError> {
        let primary = SerperSearchProvider::new(config.serper_api_key.clone())?;
        let secondary = DuckDuckGoSearchProvider::new()?;
        Ok(Self::new(
            Arc::new(primary),
            Arc::new(secondary),
            config.default_search_engine,
        ))
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn ordered(&self) -> [&Arc<dyn SearchProvider>; 2] {
        match self.preference {
            EnginePreference::Primary => [&self.primary, &self.secondary],
            EnginePreference::Secondary => [&self.secondary, &self.primary],
        }
    }

    /// Search the web. Provider failures are absorbed: the worst case is an
    /// empty result list.
    pub async fn search(&self, query: &str, max_results: usize, region: &str) -> Vec<SearchResult> {
        let providers = self.ordered();
        for (idx, provider) in providers.iter().enumerate() {
            let has_next = idx + 1 < providers.len();
            let outcome = if provider.is_configured() {
                self.search_with_backoff(provider.as_ref(), query, max_results, region)
                    .await
            } else {
                Err(SearchError::NotConfigured(provider.name()))
            };
            match outcome {
                Ok(results) => {
                    let results = dedup_results(results, &mut HashSet::new());
                    debug!(
                        target: "delve.search",
                        provider = provider.name(),
                        %query,
                        count = results.len(),
                        "search succeeded"
                    );
                    return results.into_iter().take(max_results).collect();
                }
                Err(err) => match err {
                    SearchError::NotConfigured(_)
                    | SearchError::MissingCredentials(_)
                    | SearchError::Authentication(_)
                    | SearchError::QuotaExceeded(_)
                    | SearchError::RateLimited { .. } => {
                        info!(
                            target: "delve.search",
                            provider = provider.name(),
                            code = err.code_str(),
                            error = %err,
                            failover = has_next,
                            "provider unavailable"
                        );
                    }
                    _ => {
                        warn!(
                            target: "delve.search",
                            provider = provider.name(),
                            code = err.code_str(),
                            error = %err,
                            failover = has_next,
                            "provider request failed"
                        );
                    }
                },
            }
        }
        warn!(target: "delve.search", %query, "all search providers failed; returning no results");
        Vec::new()
    }

    async fn search_with_backoff(
        &self,
        provider: &dyn SearchProvider,
        query: &str,
        max_results: usize,
        region: &str,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let mut attempt = 1;
        loop {
            match provider.search(query, max_results, region).await {
                Err(SearchError::RateLimited { retry_after })
                    if attempt < self.retry.max_attempts =>
                {
                    let delay = self.retry.delay_for(attempt, retry_after);
                    debug!(
                        target: "delve.search",
                        provider = provider.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        server_requested = retry_after.is_some(),
                        "rate limited; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Run one search per query concurrently. Results come back in query order,
    /// deduplicated across the whole batch: the first occurrence of a URL wins.
    pub async fn search_many(
        &self,
        queries: &[String],
        max_results: usize,
        region: &str,
    ) -> Vec<Vec<SearchResult>> {
        let batches = futures::future::join_all(
            queries
                .iter()
                .map(|q| self.search(q, max_results, region)),
        )
        .await;

        let mut seen = HashSet::new();
        batches
            .into_iter()
            .map(|batch| dedup_results(batch, &mut seen))
            .collect()
    }
}

/// Drop results whose normalized URL is already in `seen`.
pub fn dedup_results(results: Vec<SearchResult>, seen: &mut HashSet<String>) -> Vec<SearchResult> {
    results
        .into_iter()
        .filter(|r| seen.insert(r.normalized_url()))
        .collect()
}

/// Count results per domain, most frequent first (ties by domain name).
pub fn aggregate_sources(results: &[SearchResult]) -> Vec<SourceCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for result in results {
        if result.source_domain.is_empty() {
            continue;
        }
        *counts.entry(result.source_domain.as_str()).or_default() += 1;
    }
    let mut sources: Vec<SourceCount> = counts
        .into_iter()
        .map(|(domain, count)| SourceCount {
            domain: domain.to_string(),
            count,
        })
        .collect();
    sources.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.domain.cmp(&b.domain)));
    sources
}
