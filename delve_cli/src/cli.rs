use clap::{Parser, Subcommand, ValueEnum};
use delve_core::EnginePreference;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "delve")]
#[command(about = "Delve - deep web research from the terminal")]
#[command(version)]
#[command(after_help = "\x1b[1;36mQuick Start:\x1b[0m
  delve research \"impact of rate cuts on small caps\"   Run a full research session
  delve search \"rust async runtimes\" --limit 5          Search without scraping
  delve fetch https://example.com/article               Extract readable text from a page
  delve show <message-id>                               Show a saved research trail

\x1b[1;36mConfiguration:\x1b[0m
  delve config show                                     View effective settings
  delve config path                                     Print the config file location

\x1b[1;36mEnvironment:\x1b[0m
  SERPER_API_KEY, OPENAI_API_KEY, OPENAI_BASE_URL, DELVE_MODEL, DELVE_DATA_DIR")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Pretty)]
    pub output: OutputFormat,

    /// Config file to read instead of the default location
    #[arg(long = "config", global = true, env = "DELVE_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a research session and stream the answer
    #[command(visible_alias = "r")]
    Research {
        /// The question to research
        query: String,

        /// Search results per subtask
        #[arg(long)]
        max_sources: Option<usize>,

        /// Pages fetched for extraction
        #[arg(long)]
        max_scrape: Option<usize>,

        /// Search region (e.g. us-en, uk-en)
        #[arg(long)]
        region: Option<String>,

        /// Search provider tried first
        #[arg(long, value_parser = parse_engine)]
        engine: Option<EnginePreference>,

        /// Key for the saved research trail
        #[arg(long)]
        message_id: Option<String>,

        /// Keep the research trail in memory only
        #[arg(long)]
        no_save: bool,

        /// Print raw server-sent event frames instead of formatted progress
        #[arg(long)]
        events: bool,
    },

    /// Search the web with provider failover
    #[command(visible_alias = "s")]
    Search {
        /// Search query
        query: String,

        /// Maximum number of results
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Search region (e.g. us-en, uk-en)
        #[arg(long)]
        region: Option<String>,

        /// Search provider tried first
        #[arg(long, value_parser = parse_engine)]
        engine: Option<EnginePreference>,
    },

    /// Fetch a page and extract its readable text
    Fetch {
        /// Page URL
        url: String,

        /// Maximum characters of extracted text
        #[arg(long)]
        max_length: Option<usize>,
    },

    /// Show a saved research trail
    Show {
        /// Message id the trail was saved under
        message_id: String,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Print the config file path
    Path,
}

#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable formatted output
    Pretty,
    /// JSON output
    Json,
    /// YAML output
    Yaml,
    /// Plain text output
    Text,
}

fn parse_engine(s: &str) -> std::result::Result<EnginePreference, String> {
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn research_flags_parse() {
        let cli = Cli::try_parse_from([
            "delve",
            "research",
            "what changed",
            "--max-scrape",
            "3",
            "--engine",
            "ddg",
            "--output",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::Research {
                query,
                max_scrape,
                engine,
                no_save,
                ..
            } => {
                assert_eq!(query, "what changed");
                assert_eq!(max_scrape, Some(3));
                assert_eq!(engine, Some(EnginePreference::Secondary));
                assert!(!no_save);
            }
            _ => panic!("expected research command"),
        }
    }

    #[test]
    fn unknown_engine_is_rejected() {
        assert!(Cli::try_parse_from(["delve", "search", "q", "--engine", "bing"]).is_err());
    }
}
