use crate::cli::Cli;
use crate::commands::{load_config, spinner, CommandError, Result};
use crate::output::{effective_format, format_output, OutputData};
use delve_core::ContentExtractor;

/// Fetch one page through the extractor used by research sessions.
pub async fn run(cli: &Cli, url: &str, max_length: Option<usize>) -> Result<()> {
    let url = url.trim();
    if url.is_empty() {
        return Err(CommandError::InvalidInput("URL is empty".into()));
    }

    let mut config = load_config(cli)?;
    if let Some(max_length) = max_length.filter(|n| *n > 0) {
        config.max_content_length = max_length;
    }
    let extractor = ContentExtractor::from_config(&config)?;

    let progress = spinner(format!("Fetching {}...", url));
    let page = extractor.extract(url).await;
    progress.finish_and_clear();

    format_output(&OutputData::Page(page), &effective_format(cli))
}
