use clap::{Args, Subcommand};
use serde_json::json;

use crate::cli::utils::*;
use crate::cli::{OutputFormat, Session};
use crate::filter::FilterData;

#[derive(Args)]
pub struct ScopeArgs {
    #[arg(long, help = "Include soft-deleted rows")]
    pub include_deleted: bool,

    #[arg(long, help = "Only soft-deleted rows", conflicts_with = "include_deleted")]
    pub only_deleted: bool,
}

#[derive(Subcommand)]
pub enum RecordCommands {
    #[command(about = "Soft-delete one row")]
    Delete {
        #[arg(help = "Table name")]
        table: String,

        #[arg(help = "Row ID")]
        id: i64,
    },

    #[command(about = "Restore one soft-deleted row")]
    Restore {
        #[arg(help = "Table name")]
        table: String,

        #[arg(help = "Row ID")]
        id: i64,
    },

    #[command(about = "Count rows")]
    Count {
        #[arg(help = "Table name")]
        table: String,

        #[arg(long = "where", help = "Filter as JSON, e.g. '{\"tenant_id\": 2}'")]
        where_clause: Option<String>,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    #[command(about = "List rows as JSON")]
    List {
        #[arg(help = "Table name")]
        table: String,

        #[arg(long = "where", help = "Filter as JSON, e.g. '{\"name\": {\"$ilike\": \"%report%\"}}'")]
        where_clause: Option<String>,

        #[arg(long, help = "Order as JSON, e.g. '\"id desc\"'")]
        order: Option<String>,

        #[arg(long)]
        limit: Option<i32>,

        #[arg(long)]
        offset: Option<i32>,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    #[command(about = "Show one row")]
    Show {
        #[arg(help = "Table name")]
        table: String,

        #[arg(help = "Row ID")]
        id: i64,

        #[arg(long, help = "Also find soft-deleted rows")]
        include_deleted: bool,
    },
}

pub async fn handle(cmd: RecordCommands, session: &Session, output_format: OutputFormat) -> anyhow::Result<()> {
    let store = session.guard.store();

    match cmd {
        RecordCommands::Delete { table, id } => {
            session.guard.soft_delete(&session.ctx, &table, id).await?;
            output_success(&output_format, &format!("Soft-deleted {} {}", table, id), None)
        }
        RecordCommands::Restore { table, id } => {
            store.restore(&session.ctx, &table, id).await?;
            output_success(&output_format, &format!("Restored {} {}", table, id), None)
        }
        RecordCommands::Count { table, where_clause, scope } => {
            let data = FilterData {
                where_clause: parse_json_arg("where", where_clause.as_deref())?,
                include_deleted: scope.include_deleted,
                only_deleted: scope.only_deleted,
                ..Default::default()
            };
            let count = store.count(&table, data).await?;
            match output_format {
                OutputFormat::Json => print_json(&json!({ "table": table, "count": count })),
                OutputFormat::Text => {
                    println!("{}", count);
                    Ok(())
                }
            }
        }
        RecordCommands::List { table, where_clause, order, limit, offset, scope } => {
            let data = FilterData {
                where_clause: parse_json_arg("where", where_clause.as_deref())?,
                order: parse_json_arg("order", order.as_deref())?,
                limit,
                offset,
                include_deleted: scope.include_deleted,
                only_deleted: scope.only_deleted,
            };
            let rows = store.fetch_all(&table, data).await?;
            if rows.is_empty() {
                return output_empty_collection(&output_format, &table, "No rows found");
            }
            match output_format {
                OutputFormat::Json => print_json(&json!({ table.as_str(): rows })),
                OutputFormat::Text => {
                    for row in &rows {
                        println!("{}", serde_json::to_string(row)?);
                    }
                    Ok(())
                }
            }
        }
        RecordCommands::Show { table, id, include_deleted } => {
            let row = store.find(&table, id, include_deleted).await?;
            print_json(&row)
        }
    }
}
