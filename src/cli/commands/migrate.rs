use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::*;
use crate::cli::{OutputFormat, Session};
use crate::database::MigrationRunner;

#[derive(Subcommand)]
pub enum MigrateCommands {
    #[command(about = "Apply pending migrations")]
    Run,

    #[command(about = "List applied and pending migrations")]
    Status,
}

pub async fn handle(cmd: MigrateCommands, session: &Session, output_format: OutputFormat) -> anyhow::Result<()> {
    let runner = MigrationRunner::new(session.db.pool().clone());

    match cmd {
        MigrateCommands::Run => {
            let applied = runner.run().await?;
            let message = if applied.is_empty() {
                "Schema is up to date".to_string()
            } else {
                format!("Applied {} migration(s)", applied.len())
            };
            output_success(&output_format, &message, Some(json!({ "applied": applied })))
        }
        MigrateCommands::Status => {
            let status = runner.status().await?;
            match output_format {
                OutputFormat::Json => print_json(&json!({ "migrations": status })),
                OutputFormat::Text => {
                    println!("{:<8} {:<40} {}", "VERSION", "NAME", "APPLIED");
                    println!("{}", "-".repeat(70));
                    for m in &status {
                        let applied = m.applied_at.map(|t| format_timestamp(Some(t))).unwrap_or_else(|| "pending".to_string());
                        println!("{:04}     {:<40} {}", m.version, m.name, applied);
                    }
                    Ok(())
                }
            }
        }
    }
}
