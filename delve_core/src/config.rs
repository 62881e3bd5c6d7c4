//! Research configuration.
//!
//! Values come from (lowest to highest precedence): built-in defaults, the
//! optional TOML file at `<config_dir>/delve/config.toml`, then environment
//! variables. CLI flags and request fields override per session.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MAX_SEARCH_RESULTS: usize = 10;
pub const DEFAULT_MAX_SCRAPE_PAGES: usize = 8;
pub const DEFAULT_SCRAPER_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 3000;
pub const DEFAULT_MAX_CONCURRENT_SCRAPES: usize = 5;
pub const DEFAULT_DECOMPOSE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SYNTHESIS_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_SEARCH_REGION: &str = "us-en";
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

/// Which search provider is tried first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePreference {
    /// Credentialed, quota-limited provider (Serper).
    #[default]
    Primary,
    /// Open provider that needs no credentials (DuckDuckGo).
    Secondary,
}

impl std::str::FromStr for EnginePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "primary" | "serper" | "google" => Ok(EnginePreference::Primary),
            "secondary" | "duckduckgo" | "ddg" => Ok(EnginePreference::Secondary),
            other => Err(format!("expected primary|secondary, got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            api_key: None,
            temperature: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    pub default_search_engine: EnginePreference,
    pub max_search_results: usize,
    pub max_scrape_pages: usize,
    /// Per-page fetch timeout in seconds.
    pub web_scraper_timeout: u64,
    pub max_content_length: usize,
    pub max_concurrent_scrapes: usize,
    pub decompose_timeout: u64,
    /// Longest wait in seconds for the synthesis response and between its chunks.
    pub synthesis_timeout: u64,
    pub search_region: String,
    #[serde(skip_serializing)]
    pub serper_api_key: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub llm: LlmSettings,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            default_search_engine: EnginePreference::Primary,
            max_search_results: DEFAULT_MAX_SEARCH_RESULTS,
            max_scrape_pages: DEFAULT_MAX_SCRAPE_PAGES,
            web_scraper_timeout: DEFAULT_SCRAPER_TIMEOUT_SECS,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            max_concurrent_scrapes: DEFAULT_MAX_CONCURRENT_SCRAPES,
            decompose_timeout: DEFAULT_DECOMPOSE_TIMEOUT_SECS,
            synthesis_timeout: DEFAULT_SYNTHESIS_TIMEOUT_SECS,
            search_region: DEFAULT_SEARCH_REGION.to_string(),
            serper_api_key: None,
            data_dir: None,
            llm: LlmSettings::default(),
        }
    }
}

impl ResearchConfig {
    /// Default config file location.
    pub fn default_path() -> PathBuf {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|p| p.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("delve").join("config.toml")
    }

    /// Load from the default file (if present) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file_if_exists(&Self::default_path())?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file_if_exists(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content, &path.display().to_string()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub fn from_toml_str(content: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    /// Apply environment overrides using `lookup` (injectable for tests).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DEFAULT_SEARCH_ENGINE") {
            self.default_search_engine =
                v.parse()
                    .map_err(|reason| ConfigError::InvalidValue {
                        key: "DEFAULT_SEARCH_ENGINE",
                        value: v.clone(),
                        reason,
                    })?;
        }
        if let Some(v) = get("MAX_SEARCH_RESULTS") {
            self.max_search_results = parse_positive("MAX_SEARCH_RESULTS", &v)?;
        }
        if let Some(v) = get("MAX_SCRAPE_PAGES") {
            self.max_scrape_pages = parse_positive("MAX_SCRAPE_PAGES", &v)?;
        }
        if let Some(v) = get("WEB_SCRAPER_TIMEOUT") {
            self.web_scraper_timeout = parse_positive("WEB_SCRAPER_TIMEOUT", &v)? as u64;
        }
        if let Some(v) = get("MAX_CONTENT_LENGTH") {
            self.max_content_length = parse_positive("MAX_CONTENT_LENGTH", &v)?;
        }
        if let Some(v) = get("MAX_CONCURRENT_SCRAPES") {
            self.max_concurrent_scrapes = parse_positive("MAX_CONCURRENT_SCRAPES", &v)?;
        }
        if let Some(v) = get("DECOMPOSE_TIMEOUT") {
            self.decompose_timeout = parse_positive("DECOMPOSE_TIMEOUT", &v)? as u64;
        }
        if let Some(v) = get("SYNTHESIS_TIMEOUT") {
            self.synthesis_timeout = parse_positive("SYNTHESIS_TIMEOUT", &v)? as u64;
        }
        if let Some(v) = get("SEARCH_REGION") {
            self.search_region = v;
        }
        if let Some(v) = get("SERPER_API_KEY") {
            self.serper_api_key = Some(v);
        }
        if let Some(v) = get("DELVE_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("DELVE_MODEL") {
            self.llm.model = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, usize); 6] = [
            ("MAX_SEARCH_RESULTS", self.max_search_results),
            ("MAX_SCRAPE_PAGES", self.max_scrape_pages),
            ("WEB_SCRAPER_TIMEOUT", self.web_scraper_timeout as usize),
            ("MAX_CONTENT_LENGTH", self.max_content_length),
            ("MAX_CONCURRENT_SCRAPES", self.max_concurrent_scrapes),
            ("SYNTHESIS_TIMEOUT", self.synthesis_timeout as usize),
        ];
        for (key, value) in checks {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: "0".to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn scraper_timeout(&self) -> Duration {
        Duration::from_secs(self.web_scraper_timeout)
    }

    pub fn decompose_timeout(&self) -> Duration {
        Duration::from_secs(self.decompose_timeout)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout)
    }

    /// Directory used by the file-backed research store.
    pub fn research_dir(&self) -> PathBuf {
        let base = self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .or_else(|| dirs::home_dir().map(|p| p.join(".local").join("share")))
                .unwrap_or_else(|| PathBuf::from("."))
                .join("delve")
        });
        base.join("research")
    }
}

fn parse_positive(key: &'static str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        Ok(_) => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        Err(e) => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ResearchConfig::default();
        assert_eq!(config.web_scraper_timeout, 10);
        assert_eq!(config.max_content_length, 3000);
        assert_eq!(config.max_concurrent_scrapes, 5);
        assert_eq!(config.default_search_engine, EnginePreference::Primary);
        assert_eq!(config.synthesis_timeout(), Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = ResearchConfig::default();
        config
            .apply_env(env(&[
                ("DEFAULT_SEARCH_ENGINE", "secondary"),
                ("MAX_SEARCH_RESULTS", "4"),
                ("WEB_SCRAPER_TIMEOUT", "3"),
                ("SERPER_API_KEY", "abc"),
                ("OPENAI_BASE_URL", "http://localhost:11434/v1"),
                ("SYNTHESIS_TIMEOUT", "45"),
            ]))
            .unwrap();
        assert_eq!(config.synthesis_timeout(), Duration::from_secs(45));
        assert_eq!(config.default_search_engine, EnginePreference::Secondary);
        assert_eq!(config.max_search_results, 4);
        assert_eq!(config.scraper_timeout(), Duration::from_secs(3));
        assert_eq!(config.serper_api_key.as_deref(), Some("abc"));
        assert_eq!(config.llm.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn invalid_env_value_names_the_key() {
        let mut config = ResearchConfig::default();
        let err = config
            .apply_env(env(&[("MAX_CONCURRENT_SCRAPES", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("MAX_CONCURRENT_SCRAPES"));

        let err = config
            .apply_env(env(&[("MAX_CONTENT_LENGTH", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
    }

    #[test]
    fn toml_file_is_partial() {
        let config = ResearchConfig::from_toml_str(
            r#"
            default_search_engine = "secondary"
            max_scrape_pages = 3

            [llm]
            model = "llama3.1"
            "#,
            "inline",
        )
        .unwrap();
        assert_eq!(config.default_search_engine, EnginePreference::Secondary);
        assert_eq!(config.max_scrape_pages, 3);
        assert_eq!(config.max_content_length, DEFAULT_MAX_CONTENT_LENGTH);
        assert_eq!(config.llm.model, "llama3.1");
        assert_eq!(config.llm.base_url, DEFAULT_LLM_BASE_URL);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ResearchConfig::from_file_if_exists(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.max_search_results, DEFAULT_MAX_SEARCH_RESULTS);
    }
}
