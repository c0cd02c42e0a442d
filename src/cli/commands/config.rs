use clap::Subcommand;
use serde_json::{json, Map, Value};

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::config::{AppConfig, ConfigKey, ConfigValue};

#[derive(Subcommand)]
pub enum ConfigCommands {
    #[command(about = "Show every configuration key")]
    Show,

    #[command(about = "Show one configuration key, e.g. guard.max_limit")]
    Get {
        #[arg(help = "Dotted key name")]
        key: ConfigKey,
    },
}

pub fn handle(cmd: ConfigCommands, config: &AppConfig, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        ConfigCommands::Show => {
            match output_format {
                OutputFormat::Json => {
                    let mut values = Map::new();
                    for key in ConfigKey::ALL {
                        values.insert(key.as_str().to_string(), serde_json::to_value(config.get(key))?);
                    }
                    values.insert("database.url".to_string(), json!(config.database.url.is_some()));
                    print_json(&json!({ "config": Value::Object(values), "valid": config.validate().is_ok() }))?;
                }
                OutputFormat::Text => {
                    for key in ConfigKey::ALL {
                        println!("{:<32} {}", key.as_str(), config.get(key));
                    }
                    let url = if config.database.url.is_some() { "(set)" } else { "(unset)" };
                    println!("{:<32} {}", "database.url", url);
                    if let Err(e) = config.validate() {
                        println!();
                        println!("⚠ {}", e);
                    }
                }
            }
            Ok(())
        }
        ConfigCommands::Get { key } => {
            let value = config.get(key);
            match output_format {
                OutputFormat::Json => print_json(&json!({ "key": key.as_str(), "value": value })),
                OutputFormat::Text => {
                    if value == ConfigValue::Unset {
                        println!("{} is not set", key.as_str());
                    } else {
                        println!("{}", value);
                    }
                    Ok(())
                }
            }
        }
    }
}
