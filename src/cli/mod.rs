pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::audit;
use crate::auth::AuthContext;
use crate::config::AppConfig;
use crate::database::models::UserId;
use crate::database::DatabaseManager;
use crate::guard::Guard;

#[derive(Parser)]
#[command(name = "nexio")]
#[command(about = "Nexio CLI - tenant isolation maintenance for CollaboraNexio")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[arg(long, global = true, help = "YAML configuration file (environment variables still override it)")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Act as this user instead of the system context")]
    pub as_user: Option<UserId>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Schema migrations")]
    Migrate {
        #[command(subcommand)]
        cmd: commands::migrate::MigrateCommands,
    },

    #[command(about = "Tenant lifecycle: create, deactivate, restore")]
    Tenant {
        #[command(subcommand)]
        cmd: commands::tenant::TenantCommands,
    },

    #[command(about = "Users, roles and access grants")]
    User {
        #[command(subcommand)]
        cmd: commands::user::UserCommands,
    },

    #[command(about = "Tenant access resolution")]
    Access {
        #[command(subcommand)]
        cmd: commands::access::AccessCommands,
    },

    #[command(about = "Soft-delete operations on any tenant-scoped table")]
    Record {
        #[command(subcommand)]
        cmd: commands::record::RecordCommands,
    },

    #[command(about = "Inspect effective configuration")]
    Config {
        #[command(subcommand)]
        cmd: commands::config::ConfigCommands,
    },

    #[command(about = "Check database connectivity and schema")]
    Health,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

/// Everything a database-backed command needs
pub struct Session {
    pub config: AppConfig,
    pub db: DatabaseManager,
    pub guard: Guard,
    pub ctx: AuthContext,
}

impl Session {
    pub async fn open(config: AppConfig, as_user: Option<UserId>) -> anyhow::Result<Self> {
        let db = DatabaseManager::connect(&config.database).await?;
        let ctx = match as_user {
            Some(user_id) => {
                let mut conn = db.pool().acquire().await?;
                AuthContext::load(&mut conn, user_id).await?
            }
            None => AuthContext::system(),
        };
        let audit = audit::sink_for(config.security.enable_audit_logging);
        let guard = Guard::new(db.pool().clone(), &config, audit);
        Ok(Self { config, db, guard, ctx })
    }
}

pub fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);
    let config = load_config(&cli)?;

    let command = match cli.command {
        // Inspecting configuration must work even when it would not validate
        Commands::Config { cmd } => return commands::config::handle(cmd, &config, output_format),
        other => other,
    };
    config.validate()?;

    let session = Session::open(config, cli.as_user).await?;
    let result = match command {
        Commands::Migrate { cmd } => commands::migrate::handle(cmd, &session, output_format).await,
        Commands::Tenant { cmd } => commands::tenant::handle(cmd, &session, output_format).await,
        Commands::User { cmd } => commands::user::handle(cmd, &session, output_format).await,
        Commands::Access { cmd } => commands::access::handle(cmd, &session, output_format).await,
        Commands::Record { cmd } => commands::record::handle(cmd, &session, output_format).await,
        Commands::Health => commands::health::handle(&session, output_format).await,
        Commands::Config { .. } => Ok(()),
    };
    session.db.close().await;
    result
}
