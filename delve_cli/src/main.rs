use clap::Parser;
use owo_colors::OwoColorize;
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod commands;
mod output;

use cli::{Cli, Commands};
use commands::research::ResearchArgs;
use commands::*;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "delve=warn,delve_cli=info",
        1 => "delve=debug",
        _ => "delve=trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match &cli.command {
        Commands::Research {
            query,
            max_sources,
            max_scrape,
            region,
            engine,
            message_id,
            no_save,
            events,
        } => {
            let args = ResearchArgs {
                query: query.clone(),
                max_sources: *max_sources,
                max_scrape: *max_scrape,
                region: region.clone(),
                engine: *engine,
                message_id: message_id.clone(),
                no_save: *no_save,
                events: *events,
            };
            research::run(&cli, args).await
        }
        Commands::Search {
            query,
            limit,
            region,
            engine,
        } => search::run(&cli, query, *limit, region.as_deref(), *engine).await,
        Commands::Fetch { url, max_length } => fetch::run(&cli, url, *max_length).await,
        Commands::Show { message_id } => show::run(&cli, message_id).await,
        Commands::Config { action } => config::run(&cli, action.clone()).await,
    };

    if let Err(e) = result {
        eprintln!("{}: {}", "Error".red().bold(), e);
        process::exit(1);
    }
}
