use serde_json::json;

use crate::cli::utils::*;
use crate::cli::{OutputFormat, Session};
use crate::database::{schema, MigrationRunner};

pub async fn handle(session: &Session, output_format: OutputFormat) -> anyhow::Result<()> {
    session.db.health_check().await?;

    let status = MigrationRunner::new(session.db.pool().clone()).status().await?;
    let pending: Vec<i64> = status.iter().filter(|m| m.applied_at.is_none()).map(|m| m.version).collect();

    let mut conn = session.db.pool().acquire().await?;
    let mut drift = Vec::new();
    if let Err(e) = schema::require_soft_delete(&mut conn, "tenants").await {
        drift.push(e.to_string());
    }
    for table in &session.config.guard.tenant_scoped_tables {
        if let Err(e) = schema::require_tenant_scoped(&mut conn, table).await {
            drift.push(e.to_string());
        }
    }

    let healthy = pending.is_empty() && drift.is_empty();
    match output_format {
        OutputFormat::Json => print_json(&json!({
            "healthy": healthy,
            "database": "ok",
            "pending_migrations": pending,
            "schema_drift": drift,
        }))?,
        OutputFormat::Text => {
            println!("Database:           ok");
            println!("Pending migrations: {}", pending.len());
            for problem in &drift {
                println!("Schema drift:       {}", problem);
            }
            if healthy {
                println!("✓ healthy");
            }
        }
    }

    if healthy {
        Ok(())
    } else {
        Err(anyhow::anyhow!("database is reachable but not ready"))
    }
}
