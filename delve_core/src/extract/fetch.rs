use crate::error::FetchError;
use crate::utils::DEFAULT_USER_AGENT;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE};
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

/// A successfully downloaded HTML page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// Downloads a page. Anything that is not a successful HTML response is an error.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

pub struct HttpFetcher {
    client: Client,
    timeout_secs: u64,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .http1_only()
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .timeout(timeout)
            .pool_max_idle_per_host(2)
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .user_agent(DEFAULT_USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| FetchError::Other(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs().max(1),
        })
    }
}

fn is_html_content_type(content_type: &str) -> bool {
    let lowered = content_type.to_ascii_lowercase();
    lowered.contains("html") || lowered.contains("xml") || lowered.starts_with("text/plain")
}

fn looks_like_markup(body: &str) -> bool {
    body.trim_start().starts_with('<')
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }

        let t0 = Instant::now();
        let resp = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, self.timeout_secs))?;
        let t1 = Instant::now();

        let status = resp.status();
        if !status.is_success() {
            debug!(
                target: "delve.extract",
                url = %url,
                status = status.as_u16(),
                "page fetch rejected"
            );
            return Err(FetchError::Status(status.as_u16()));
        }

        let final_url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if let Some(ct) = content_type.as_deref() {
            if !is_html_content_type(ct) {
                return Err(FetchError::UnsupportedContent(ct.to_string()));
            }
        }

        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(e, self.timeout_secs))?;
        let t2 = Instant::now();

        if content_type.is_none() && !looks_like_markup(&body) {
            return Err(FetchError::UnsupportedContent("unknown".to_string()));
        }

        debug!(
            target: "delve.extract",
            url = %url,
            connect_send_ms = %((t1 - t0).as_millis()),
            read_body_ms = %((t2 - t1).as_millis()),
            body_bytes = body.len(),
            "fetched page"
        );

        Ok(FetchedPage {
            url: final_url,
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}
