use crate::cli::Cli;
use crate::commands::{load_config, CommandError, Result};
use crate::output::{effective_format, format_output, OutputData};
use delve_core::{FileResearchStore, PersistenceAdapter};

pub async fn run(cli: &Cli, message_id: &str) -> Result<()> {
    let config = load_config(cli)?;
    let store = FileResearchStore::new(config.research_dir());
    let trail = store
        .load(message_id)
        .await?
        .ok_or_else(|| CommandError::TrailNotFound(message_id.to_string()))?;

    let data = OutputData::Trail {
        message_id: message_id.to_string(),
        trail,
    };
    format_output(&data, &effective_format(cli))
}
