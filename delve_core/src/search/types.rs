//! Core types for web search results.

use crate::utils::{normalize_url, source_domain};
use serde::{Deserialize, Serialize};

/// A single web search hit, normalized across providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
    /// Host of `url` without a leading `www.`
    pub source_domain: String,
}

impl SearchResult {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            title: title.into(),
            source_domain: source_domain(&url),
            url,
            snippet: String::new(),
        }
    }

    /// Builder method to add a snippet.
    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    /// Key used for duplicate detection.
    pub fn normalized_url(&self) -> String {
        normalize_url(&self.url)
    }
}

/// Number of results contributed by one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCount {
    pub domain: String,
    pub count: usize,
}
