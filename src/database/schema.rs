//! Live schema introspection.
//!
//! Soft-delete and cascade operations check the shape of the tables they touch
//! before issuing any UPDATE, so a table without `deleted_at` (or `tenant_id`)
//! aborts the operation with `GuardError::Constraint` instead of being skipped.

use sqlx::PgConnection;
use std::collections::HashMap;

use crate::error::GuardError;
use crate::filter::is_valid_identifier;

pub const DELETED_AT: &str = "deleted_at";
pub const TENANT_ID: &str = "tenant_id";

pub async fn table_exists(conn: &mut PgConnection, table: &str) -> Result<bool, GuardError> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (
             SELECT 1 FROM information_schema.tables
             WHERE table_schema = current_schema() AND table_name = $1
         )",
    )
    .bind(table)
    .fetch_one(&mut *conn)
    .await?;
    Ok(exists)
}

pub async fn column_exists(conn: &mut PgConnection, table: &str, column: &str) -> Result<bool, GuardError> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (
             SELECT 1 FROM information_schema.columns
             WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2
         )",
    )
    .bind(table)
    .bind(column)
    .fetch_one(&mut *conn)
    .await?;
    Ok(exists)
}

/// Column name to Postgres type name (`udt_name`: `int8`, `timestamptz`, ...)
pub async fn column_types(conn: &mut PgConnection, table: &str) -> Result<HashMap<String, String>, GuardError> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT column_name::text, udt_name::text FROM information_schema.columns
         WHERE table_schema = current_schema() AND table_name = $1",
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().collect())
}

/// The table exists and carries every listed column
pub async fn require_columns(conn: &mut PgConnection, table: &str, columns: &[&str]) -> Result<(), GuardError> {
    if !is_valid_identifier(table) {
        return Err(GuardError::InvalidIdentifier(table.to_string()));
    }
    if !table_exists(conn, table).await? {
        tracing::warn!("Schema drift: table '{}' does not exist", table);
        return Err(GuardError::Constraint(format!("table '{}' does not exist", table)));
    }
    for column in columns {
        if !column_exists(conn, table, column).await? {
            tracing::warn!("Schema drift: table '{}' has no '{}' column", table, column);
            return Err(GuardError::Constraint(format!("table '{}' has no '{}' column", table, column)));
        }
    }
    Ok(())
}

pub async fn require_soft_delete(conn: &mut PgConnection, table: &str) -> Result<(), GuardError> {
    require_columns(conn, table, &[DELETED_AT]).await
}

pub async fn require_tenant_scoped(conn: &mut PgConnection, table: &str) -> Result<(), GuardError> {
    require_columns(conn, table, &[TENANT_ID, DELETED_AT]).await
}
