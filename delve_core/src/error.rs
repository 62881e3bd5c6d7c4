// src/error.rs
use crate::session::SessionStatus;
use std::time::Duration;

/// Failure of a single search provider call.
///
/// The engine inspects the variant to decide whether to fail over; callers of
/// [`crate::search::SearchEngine::search`] never see these.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("provider '{0}' is not configured")]
    NotConfigured(&'static str),

    #[error("missing credentials for provider '{0}'")]
    MissingCredentials(&'static str),

    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("rate limited by upstream")]
    RateLimited {
        /// Server-requested wait from `Retry-After`, when sent.
        retry_after: Option<Duration>,
    },

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("failed to parse provider response: {0}")]
    Parse(String),
}

impl SearchError {
    pub fn code_str(&self) -> &'static str {
        match self {
            SearchError::NotConfigured(_) => "not_configured",
            SearchError::MissingCredentials(_) => "missing_credentials",
            SearchError::Authentication(_) => "auth_failed",
            SearchError::QuotaExceeded(_) => "quota_exceeded",
            SearchError::RateLimited { .. } => "rate_limited",
            SearchError::Upstream(_) | SearchError::HttpRequest(_) => "upstream_error",
            SearchError::Parse(_) => "parse_error",
        }
    }
}

/// Why a page could not be fetched. Recorded on the `ScrapedContent`, never raised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("unsupported content type: {0}")]
    UnsupportedContent(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Other(String),
}

impl FetchError {
    pub fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            return FetchError::Timeout(timeout_secs);
        }
        let message = err.to_string();
        let lowered = message.to_lowercase();
        if lowered.contains("certificate") || lowered.contains("tls") || lowered.contains("ssl") {
            FetchError::Tls(message)
        } else if err.is_connect() {
            FetchError::Connect(message)
        } else if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Other(message)
        }
    }
}

/// Failure of the language model capability.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("language model is not configured: {0}")]
    NotConfigured(String),

    #[error("authentication error: {0}")]
    Authentication(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("language model error: {0}")]
    Upstream(String),

    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("invalid message id: {0}")]
    InvalidMessageId(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Top-level error for a research run.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("illegal session transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("synthesis failed: {0}")]
    Synthesis(#[from] LlmError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ResearchError {
    pub fn code_str(&self) -> &'static str {
        match self {
            ResearchError::InvalidInput(_) => "invalid_input",
            ResearchError::InvalidTransition { .. } => "internal_error",
            ResearchError::Synthesis(LlmError::Authentication(_)) => "auth_failed",
            ResearchError::Synthesis(_) => "synthesis_failed",
            ResearchError::Config(_) => "invalid_config",
            ResearchError::Persistence(_) => "persistence_error",
            ResearchError::InternalError(_) => "internal_error",
        }
    }
}
