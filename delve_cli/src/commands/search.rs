use crate::cli::Cli;
use crate::commands::{load_config, spinner, CommandError, Result};
use crate::output::{effective_format, format_output, OutputData};
use delve_core::{EnginePreference, SearchEngine};

pub async fn run(
    cli: &Cli,
    query: &str,
    limit: usize,
    region: Option<&str>,
    engine: Option<EnginePreference>,
) -> Result<()> {
    let query = query.trim();
    if query.is_empty() {
        return Err(CommandError::InvalidInput("search query is empty".into()));
    }
    if limit == 0 {
        return Err(CommandError::InvalidInput("--limit must be at least 1".into()));
    }

    let mut config = load_config(cli)?;
    if let Some(engine) = engine {
        config.default_search_engine = engine;
    }
    let region = region.unwrap_or(&config.search_region).to_string();
    let engine = SearchEngine::from_config(&config)?;

    let progress = spinner(format!("Searching for '{}'...", query));
    let results = engine.search(query, limit, &region).await;
    progress.finish_and_clear();

    let data = OutputData::SearchResults {
        query: query.to_string(),
        results,
    };
    format_output(&data, &effective_format(cli))
}
