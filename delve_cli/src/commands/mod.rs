pub mod config;
pub mod fetch;
pub mod research;
pub mod search;
pub mod show;

use crate::cli::Cli;
use delve_core::ResearchConfig;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("No research trail saved under '{0}'")]
    TrailNotFound(String),

    #[error("Research session failed: {0}")]
    SessionFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Research failed: {0}")]
    Research(#[from] delve_core::ResearchError),

    #[error("Configuration error: {0}")]
    Config(#[from] delve_core::ConfigError),

    #[error("Storage error: {0}")]
    Persistence(#[from] delve_core::PersistenceError),

    #[error("Search error: {0}")]
    Search(#[from] delve_core::SearchError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] delve_core::FetchError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, CommandError>;

/// Effective config: `--config` file (or the default one), then the environment.
pub fn load_config(cli: &Cli) -> Result<ResearchConfig> {
    let path = cli
        .config_file
        .clone()
        .unwrap_or_else(ResearchConfig::default_path);
    let mut config = ResearchConfig::from_file_if_exists(&path)?;
    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Spinner on stderr, hidden when stderr is not a terminal.
pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.into());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}
