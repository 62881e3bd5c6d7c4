use crate::cli::{Cli, OutputFormat};
use crate::commands::Result;
use delve_core::{PersistedResearchData, ScrapedContent, SearchResult, SourceCount, SourceUrl};
use owo_colors::OwoColorize;
use serde::Serialize;
use serde_json::Value;

/// Snippets longer than this are cut in pretty output.
const SNIPPET_WIDTH: usize = 160;

/// Preview length for extracted page text in pretty output.
const PAGE_PREVIEW_CHARS: usize = 1200;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum OutputData {
    Research {
        query: String,
        status: String,
        message_id: String,
        /// Whether the trail reached the on-disk store.
        saved: bool,
        subtasks: Vec<String>,
        answer: String,
        sources: Vec<SourceCount>,
        source_urls: Vec<SourceUrl>,
        error: Option<String>,
    },
    SearchResults {
        query: String,
        results: Vec<SearchResult>,
    },
    Page(ScrapedContent),
    Trail {
        message_id: String,
        trail: PersistedResearchData,
    },
    ConfigInfo(Value),
}

/// `--no-color` turns pretty output into plain text.
pub fn effective_format(cli: &Cli) -> OutputFormat {
    match cli.output {
        OutputFormat::Pretty if cli.no_color => OutputFormat::Text,
        ref other => other.clone(),
    }
}

pub fn format_output(data: &OutputData, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(data)?);
        }
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(data)?);
        }
        OutputFormat::Text => format_text_output(data)?,
        OutputFormat::Pretty => format_pretty_output(data)?,
    }
    Ok(())
}

/// First line of the plain-text research summary.
pub fn research_heading(query: &str, status: &str, message_id: &str, saved: bool) -> String {
    if saved {
        format!("Research '{}' ({}), saved as {}", query, status, message_id)
    } else {
        format!("Research '{}' ({}), not saved", query, status)
    }
}

fn format_text_output(data: &OutputData) -> Result<()> {
    match data {
        OutputData::Research {
            query,
            status,
            message_id,
            saved,
            answer,
            source_urls,
            error,
            ..
        } => {
            println!("{}", research_heading(query, status, message_id, *saved));
            if let Some(error) = error {
                println!("Error: {}", error);
            }
            println!();
            println!("{}", answer);
            println!();
            for (i, source) in source_urls.iter().enumerate() {
                println!("[{}] {}\t{}", i + 1, source.title, source.url);
            }
        }
        OutputData::SearchResults { query, results } => {
            println!("Search results for '{}':", query);
            for result in results {
                println!("{}\t{}\t{}", result.title, result.url, result.snippet);
            }
        }
        OutputData::Page(page) => {
            if let Some(title) = &page.title {
                println!("{}", title);
            }
            println!("{}", page.url);
            match &page.error {
                Some(error) => println!("Error: {}", error),
                None => println!("\n{}", page.content),
            }
        }
        OutputData::Trail { message_id, trail } => {
            println!("Research trail {}:", message_id);
            println!("{}", serde_json::to_string_pretty(trail)?);
        }
        OutputData::ConfigInfo(config) => {
            println!("Configuration:");
            println!("{}", serde_json::to_string_pretty(config)?);
        }
    }
    Ok(())
}

fn format_pretty_output(data: &OutputData) -> Result<()> {
    match data {
        OutputData::Research {
            status,
            message_id,
            saved,
            source_urls,
            error,
            ..
        } => {
            // The answer was already streamed; close with the source list.
            println!();
            if !source_urls.is_empty() {
                println!("{}", "Sources".bold().cyan());
                for (i, source) in source_urls.iter().enumerate() {
                    print_source_line(i + 1, &source.title, &source.url, &source.source);
                }
                println!();
            }
            if let Some(error) = error {
                println!("{} {}", "✗".red(), error.red());
            }
            if *saved {
                println!(
                    "{} {}  {} {}",
                    "status".dimmed(),
                    status,
                    "saved as".dimmed(),
                    message_id.dimmed()
                );
            } else {
                println!("{} {}  {}", "status".dimmed(), status, "not saved".yellow());
            }
        }
        OutputData::SearchResults { query, results } => {
            println!();
            println!("{} {}", "Results for".bold().cyan(), query.bold());
            println!();
            if results.is_empty() {
                println!("{}", "No results.".yellow());
            }
            for (i, result) in results.iter().enumerate() {
                print_source_line(i + 1, &result.title, &result.url, &result.source_domain);
                if !result.snippet.is_empty() {
                    println!("      {}", truncate(&result.snippet, SNIPPET_WIDTH).dimmed());
                }
                println!();
            }
        }
        OutputData::Page(page) => {
            println!();
            if let Some(title) = &page.title {
                println!("{}", title.bold());
            }
            println!("{}", page.url.blue().underline());
            match (&page.error, page.extraction_method) {
                (Some(error), _) => println!("{} {}", "✗".red(), error.red()),
                (None, method) => {
                    if let Some(method) = method {
                        println!(
                            "{}",
                            format!(
                                "{} chars, {} extraction",
                                page.content.chars().count(),
                                serde_json::to_value(method)?.as_str().unwrap_or("unknown")
                            )
                            .dimmed()
                        );
                    }
                    println!();
                    println!("{}", truncate(&page.content, PAGE_PREVIEW_CHARS));
                }
            }
        }
        OutputData::Trail { message_id, trail } => {
            println!();
            println!("{} {}", "Research trail".bold().cyan(), message_id.bold());
            println!();
            if !trail.query_decomposition.is_empty() {
                println!("{}", "Plan".bold());
                for subtask in &trail.query_decomposition {
                    println!("  • {}", subtask);
                }
                println!();
            }
            if !trail.sources.is_empty() {
                println!("{}", "Domains".bold());
                for source in &trail.sources {
                    println!("  {:>3}  {}", source.count, source.domain);
                }
                println!();
            }
            if !trail.source_urls.is_empty() {
                println!("{}", "Sources".bold());
                for (i, source) in trail.source_urls.iter().enumerate() {
                    print_source_line(i + 1, &source.title, &source.url, &source.source);
                }
                println!();
            }
            println!(
                "{}",
                format!(
                    "search {} ms · scrape {} ms · analysis {} ms",
                    trail.search_duration_ms, trail.scrape_duration_ms, trail.analysis_duration_ms
                )
                .dimmed()
            );
        }
        OutputData::ConfigInfo(config) => {
            println!();
            println!("{}", "Configuration".bold().cyan());
            println!();
            if let Value::Object(map) = config {
                for (key, value) in map {
                    let rendered = match value {
                        Value::String(s) => s.clone(),
                        Value::Null => "-".to_string(),
                        other => other.to_string(),
                    };
                    println!("  {:<24} {}", key.bold(), rendered);
                }
            }
        }
    }
    Ok(())
}

fn print_source_line(index: usize, title: &str, url: &str, domain: &str) {
    println!(
        "  {:>2}. {} {}",
        index.dimmed(),
        title.bold(),
        format!("({})", domain).dimmed()
    );
    println!("      {}", url.blue());
}

/// Cut to `max` characters, marking the cut with an ellipsis.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut.trim_end())
}
