use super::{retry_after, SearchProvider, SearchResult};
use crate::error::SearchError;
use crate::utils::clean_html_entities;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const SERPER_ENDPOINT: &str = "https://google.serper.dev/search";

/// Serper.dev Google SERP API. Requires `SERPER_API_KEY`; quota-limited.
pub struct SerperSearchProvider {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
}

impl SerperSearchProvider {
    pub fn new(api_key: Option<String>) -> Result<Self, SearchError> {
        let client = Client::builder()
            .user_agent(concat!("delve/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            endpoint: SERPER_ENDPOINT.to_string(),
        })
    }

    /// Point the provider at a different endpoint (tests, proxies).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Split a `us-en` style region into Serper's `gl` (country) and `hl` (language).
fn region_params(region: &str) -> (Option<String>, Option<String>) {
    let parts: Vec<&str> = region
        .split(|c| c == '-' || c == '_')
        .filter(|p| !p.is_empty())
        .collect();
    match parts.as_slice() {
        [country, lang] => (Some(country.to_lowercase()), Some(lang.to_lowercase())),
        [country] => (Some(country.to_lowercase()), None),
        _ => (None, None),
    }
}

pub(crate) fn classify_status(
    status: StatusCode,
    body: &Value,
    retry_after: Option<Duration>,
) -> SearchError {
    let message = body
        .get("message")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());
    let lowered = message.to_lowercase();
    match status.as_u16() {
        401 | 403 => SearchError::Authentication(message),
        402 => SearchError::QuotaExceeded(message),
        429 => SearchError::RateLimited { retry_after },
        _ if lowered.contains("credits") || lowered.contains("quota") => {
            SearchError::QuotaExceeded(message)
        }
        _ => SearchError::Upstream(format!("Serper API error: {} - {}", status, message)),
    }
}

pub(crate) fn parse_organic(value: &Value, max_results: usize) -> Vec<SearchResult> {
    value
        .get("organic")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let url = item.get("link").and_then(|v| v.as_str())?;
                    let title = item
                        .get("title")
                        .and_then(|v| v.as_str())
                        .unwrap_or(url);
                    let snippet = item.get("snippet").and_then(|v| v.as_str()).unwrap_or("");
                    // SERP strings can carry entities from the indexed page.
                    Some(
                        SearchResult::new(clean_html_entities(title), url)
                            .with_snippet(clean_html_entities(snippet)),
                    )
                })
                .take(max_results)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl SearchProvider for SerperSearchProvider {
    fn name(&self) -> &'static str {
        "serper"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        region: &str,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let key = self
            .api_key
            .as_ref()
            .ok_or(SearchError::MissingCredentials("serper"))?;
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-API-KEY",
            HeaderValue::from_str(key).map_err(|e| SearchError::Authentication(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let mut body = json!({ "q": query, "num": max_results });
        let (gl, hl) = region_params(region);
        if let Some(gl) = gl {
            body["gl"] = json!(gl);
        }
        if let Some(hl) = hl {
            body["hl"] = json!(hl);
        }

        let resp = self
            .client
            .post(&self.endpoint)
            .headers(headers)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        let wait = retry_after(resp.headers());
        let text = resp.text().await?;
        let value: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));
        if !status.is_success() {
            return Err(classify_status(status, &value, wait));
        }

        let results = parse_organic(&value, max_results);
        debug!(
            target: "delve.search",
            provider = "serper",
            %query,
            region,
            count = results.len(),
            "serper search finished"
        );
        Ok(results)
    }
}
