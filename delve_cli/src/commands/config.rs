use crate::cli::{Cli, ConfigAction};
use crate::commands::{load_config, Result};
use crate::output::{effective_format, format_output, OutputData};
use delve_core::ResearchConfig;
use serde_json::{json, Value};

pub async fn run(cli: &Cli, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => show_config(cli),
        ConfigAction::Path => {
            println!("{}", config_path(cli));
            Ok(())
        }
    }
}

fn config_path(cli: &Cli) -> String {
    cli.config_file
        .clone()
        .unwrap_or_else(ResearchConfig::default_path)
        .display()
        .to_string()
}

fn show_config(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let data = OutputData::ConfigInfo(config_json(cli, &config)?);
    format_output(&data, &effective_format(cli))
}

/// Settings plus credential presence. Keys are never printed.
fn config_json(cli: &Cli, config: &ResearchConfig) -> Result<Value> {
    let mut value = serde_json::to_value(config)?;
    if let Value::Object(map) = &mut value {
        if let Some(Value::Object(llm)) = map.remove("llm") {
            for (key, v) in llm {
                map.insert(format!("llm_{}", key), v);
            }
        }
        map.insert("config_file".into(), json!(config_path(cli)));
        map.insert(
            "research_dir".into(),
            json!(config.research_dir().display().to_string()),
        );
        map.insert(
            "serper_api_key".into(),
            json!(if config.serper_api_key.is_some() { "set" } else { "not set" }),
        );
        map.insert(
            "llm_api_key".into(),
            json!(if config.llm.api_key.is_some() { "set" } else { "not set" }),
        );
    }
    Ok(value)
}
