use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::*;
use crate::cli::{OutputFormat, Session};
use crate::database::models::UserId;
use crate::services::grants;

#[derive(Subcommand)]
pub enum AccessCommands {
    #[command(about = "List the tenants a user may access")]
    Resolve {
        #[arg(help = "User ID")]
        user: UserId,
    },

    #[command(about = "Compare the grant table with what roles and tenant status imply")]
    Verify,
}

pub async fn handle(cmd: AccessCommands, session: &Session, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        AccessCommands::Resolve { user } => {
            let tenants = session.guard.resolver().resolve_for_user(user).await?;
            match output_format {
                OutputFormat::Json => print_json(&json!({ "user_id": user, "tenants": tenants })),
                OutputFormat::Text => {
                    if tenants.is_empty() {
                        println!("User {} cannot access any tenant", user);
                    } else {
                        let ids: Vec<String> = tenants.iter().map(|id| id.to_string()).collect();
                        println!("User {} can access tenants: {}", user, ids.join(", "));
                    }
                    Ok(())
                }
            }
        }
        AccessCommands::Verify => {
            let mut conn = session.db.pool().acquire().await?;
            let drift = grants::verify_grants(&mut conn).await?;
            match output_format {
                OutputFormat::Json => print_json(&json!({ "clean": drift.is_clean(), "drift": drift }))?,
                OutputFormat::Text => {
                    for g in &drift.missing {
                        println!("missing  user {} -> tenant {} ({})", g.user_id, g.tenant_id, g.source.as_str());
                    }
                    for g in &drift.stale {
                        println!("stale    user {} -> tenant {} ({})", g.user_id, g.tenant_id, g.source.as_str());
                    }
                    if drift.is_clean() {
                        println!("✓ grant table matches roles and tenant status");
                    }
                }
            }
            if drift.is_clean() {
                Ok(())
            } else {
                Err(anyhow::anyhow!(
                    "grant table drift: {} missing, {} stale",
                    drift.missing.len(),
                    drift.stale.len()
                ))
            }
        }
    }
}
