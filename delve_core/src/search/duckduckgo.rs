use super::{retry_after, SearchProvider, SearchResult};
use crate::cpu_pool::spawn_cpu;
use crate::error::SearchError;
use crate::utils::{collapse_whitespace, DEFAULT_USER_AGENT};
use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::debug;
use url::Url;

const DDG_HTML_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

/// DuckDuckGo's HTML results page. No credentials; rate-limited by the upstream.
pub struct DuckDuckGoSearchProvider {
    client: Client,
    endpoint: String,
}

impl DuckDuckGoSearchProvider {
    pub fn new() -> Result<Self, SearchError> {
        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            endpoint: DDG_HTML_ENDPOINT.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Result links are wrapped in a `/l/?uddg=<target>` redirect; unwrap it.
fn resolve_href(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else if href.starts_with('/') {
        format!("https://duckduckgo.com{}", href)
    } else {
        href.to_string()
    };
    let url = Url::parse(&absolute).ok()?;
    let is_redirect = url
        .host_str()
        .map(|h| h.ends_with("duckduckgo.com"))
        .unwrap_or(false)
        && url.path().starts_with("/l/");
    if is_redirect {
        return url
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned());
    }
    if url.host_str().map(|h| h.ends_with("duckduckgo.com")).unwrap_or(false) {
        return None;
    }
    Some(absolute)
}

/// Text nodes come back with entities already decoded.
fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(el.text().collect::<Vec<_>>().join(" ").trim())
}

pub(crate) fn parse_results(html: &str, max_results: usize) -> Vec<SearchResult> {
    let document = Html::parse_document(html);
    let (Ok(result_sel), Ok(link_sel), Ok(snippet_sel)) = (
        Selector::parse("div.result"),
        Selector::parse("a.result__a"),
        Selector::parse(".result__snippet"),
    ) else {
        return Vec::new();
    };

    document
        .select(&result_sel)
        .filter(|el| {
            !el.value()
                .classes()
                .any(|c| c == "result--ad" || c == "result--no-result")
        })
        .filter_map(|el| {
            let link = el.select(&link_sel).next()?;
            let url = resolve_href(link.value().attr("href")?)?;
            let title = element_text(link);
            let snippet = el
                .select(&snippet_sel)
                .next()
                .map(element_text)
                .unwrap_or_default();
            let title = if title.is_empty() { url.clone() } else { title };
            Some(SearchResult::new(title, url).with_snippet(snippet))
        })
        .take(max_results)
        .collect()
}

/// DuckDuckGo answers throttled clients with HTTP 202 and an anomaly page.
fn looks_throttled(status: u16, body: &str) -> bool {
    status == 429 || status == 202 || body.contains("anomaly-modal")
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearchProvider {
    fn name(&self) -> &'static str {
        "duckduckgo"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        region: &str,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let mut form = vec![("q", query.to_string())];
        if !region.is_empty() {
            form.push(("kl", region.to_lowercase()));
        }

        let resp = self
            .client
            .post(&self.endpoint)
            .header(
                ACCEPT,
                HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
            )
            .header(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"))
            .form(&form)
            .send()
            .await?;
        let status = resp.status();
        let wait = retry_after(resp.headers());
        let body = resp.text().await?;

        if looks_throttled(status.as_u16(), &body) {
            return Err(SearchError::RateLimited { retry_after: wait });
        }
        if !status.is_success() {
            return Err(SearchError::Upstream(format!(
                "DuckDuckGo returned {}",
                status
            )));
        }

        let results = spawn_cpu(move || parse_results(&body, max_results))
            .await
            .map_err(|e| SearchError::Parse(e.to_string()))?;
        debug!(
            target: "delve.search",
            provider = "duckduckgo",
            %query,
            region,
            count = results.len(),
            "duckduckgo search finished"
        );
        Ok(results)
    }
}
