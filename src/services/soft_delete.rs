//! Soft-delete aware row store.
//!
//! Works on any table carrying `id` and `deleted_at`. Rows are never removed:
//! `soft_delete` stamps `deleted_at`, `restore` clears it, and every read hides
//! stamped rows unless the `FilterData` asks for them.

use serde_json::{json, Value};
use sqlx::postgres::PgArguments;
use sqlx::{PgConnection, PgPool, Row};
use std::sync::Arc;

use crate::audit::{AuditEntry, AuditSink};
use crate::auth::AuthContext;
use crate::database::models::{Role, TenantId};
use crate::database::schema;
use crate::error::GuardError;
use crate::filter::{quote_identifier, Filter, FilterData};
use crate::services::access::authorize_tenant;
use crate::services::tenant_service::{mark_tenant_deleted, mark_tenant_restored};
use crate::services::{abort, begin, commit, entity_name, grants};

const TENANTS: &str = "tenants";
const USERS: &str = "users";

/// State of a row, read under FOR UPDATE
struct LockedRow {
    deleted: bool,
    owner: Option<TenantId>,
}

pub struct SoftDeleteStore {
    pool: PgPool,
    audit: Arc<dyn AuditSink>,
    max_limit: Option<i32>,
}

impl SoftDeleteStore {
    pub fn new(pool: PgPool, audit: Arc<dyn AuditSink>) -> Self {
        Self { pool, audit, max_limit: None }
    }

    pub fn with_max_limit(mut self, max_limit: Option<i32>) -> Self {
        self.max_limit = max_limit;
        self
    }

    /// Stamp `deleted_at` on one row. A second call fails with `AlreadyDeleted`.
    pub async fn soft_delete(&self, ctx: &AuthContext, table: &str, id: i64) -> Result<(), GuardError> {
        let mut tx = begin(&self.pool).await?;
        match self.mark_deleted(&mut tx, ctx, table, id).await {
            Ok(()) => {
                commit(tx).await?;
                tracing::info!("Soft-deleted {} {}", table, id);
                Ok(())
            }
            Err(e) => Err(abort(tx, e).await),
        }
    }

    /// Clear `deleted_at` on one row. Fails with `NotDeleted` on a live row.
    pub async fn restore(&self, ctx: &AuthContext, table: &str, id: i64) -> Result<(), GuardError> {
        let mut tx = begin(&self.pool).await?;
        match self.mark_restored(&mut tx, ctx, table, id).await {
            Ok(()) => {
                commit(tx).await?;
                tracing::info!("Restored {} {}", table, id);
                Ok(())
            }
            Err(e) => Err(abort(tx, e).await),
        }
    }

    pub async fn count(&self, table: &str, data: FilterData) -> Result<i64, GuardError> {
        let mut conn = self.pool.acquire().await?;
        schema::require_soft_delete(&mut conn, table).await?;
        let column_types = schema::column_types(&mut conn, table).await?;

        let mut filter = Filter::new(table)?
            .with_max_limit(self.max_limit)
            .with_column_types(column_types);
        filter.assign(data)?;
        let sql = filter.to_count_sql()?;
        tracing::debug!("count: {} {:?}", sql.query, sql.params);

        let mut query = sqlx::query(&sql.query);
        for param in &sql.params {
            query = bind_param(query, param);
        }
        let row = query.fetch_one(&mut *conn).await?;
        Ok(row.try_get::<i64, _>("count")?)
    }

    /// Matching rows as JSON objects, one per row
    pub async fn fetch_all(&self, table: &str, data: FilterData) -> Result<Vec<Value>, GuardError> {
        let mut conn = self.pool.acquire().await?;
        schema::require_soft_delete(&mut conn, table).await?;
        let column_types = schema::column_types(&mut conn, table).await?;

        let mut filter = Filter::new(table)?
            .with_max_limit(self.max_limit)
            .with_column_types(column_types);
        filter.assign(data)?;
        let sql = filter.to_sql()?;
        tracing::debug!("fetch_all: {} {:?}", sql.query, sql.params);

        let mut query = sqlx::query(&sql.query);
        for param in &sql.params {
            query = bind_param(query, param);
        }
        let rows = query.fetch_all(&mut *conn).await?;
        rows.iter()
            .map(|row| row.try_get::<Value, _>("row").map_err(GuardError::from))
            .collect()
    }

    /// One row by id; a soft-deleted row is only returned with `include_deleted`
    pub async fn find(&self, table: &str, id: i64, include_deleted: bool) -> Result<Value, GuardError> {
        let mut data = FilterData::where_json(json!({ "id": id }));
        data.include_deleted = include_deleted;
        data.limit = Some(1);
        self.fetch_all(table, data)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GuardError::NotFound(format!("{} {}", table, id)))
    }

    async fn mark_deleted(&self, conn: &mut PgConnection, ctx: &AuthContext, table: &str, id: i64) -> Result<(), GuardError> {
        let row = lock_row(conn, table, id).await?;
        if table == TENANTS {
            ctx.require_super_admin("tenant.delete")?;
        } else if table == USERS {
            authorize_user_row(conn, ctx, id, "user.delete").await?;
        }
        authorize_tenant(conn, ctx, row.owner).await?;
        if row.deleted {
            return Err(GuardError::AlreadyDeleted(format!("{} {}", table, id)));
        }

        let (action, details) = if table == TENANTS {
            let revoked = mark_tenant_deleted(conn, id).await?;
            ("tenant_deactivated".to_string(), json!({ "grants_revoked": revoked, "cascade": false }))
        } else {
            sqlx::query(&format!(
                "UPDATE {} SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL",
                quote_identifier(table)
            ))
            .bind(id)
            .execute(&mut *conn)
            .await?;
            (format!("{}_deleted", entity_name(table)), json!({ "table": table }))
        };

        let mut entry = AuditEntry::new(ctx, action, entity_name(table), Some(id)).with_details(details);
        if let Some(owner) = row.owner.or((table == TENANTS).then_some(id)) {
            entry = entry.with_tenant(owner);
        }
        self.audit.record(conn, &entry).await
    }

    async fn mark_restored(&self, conn: &mut PgConnection, ctx: &AuthContext, table: &str, id: i64) -> Result<(), GuardError> {
        let row = lock_row(conn, table, id).await?;
        if table == TENANTS {
            ctx.require_super_admin("tenant.restore")?;
        } else if table == USERS {
            authorize_user_row(conn, ctx, id, "user.restore").await?;
        }
        authorize_tenant(conn, ctx, row.owner).await?;
        if !row.deleted {
            return Err(GuardError::NotDeleted(format!("{} {}", table, id)));
        }

        if let Some(owner) = row.owner {
            let owner_deleted: Option<bool> =
                sqlx::query_scalar("SELECT deleted_at IS NOT NULL FROM tenants WHERE id = $1 FOR SHARE")
                    .bind(owner)
                    .fetch_optional(&mut *conn)
                    .await?;
            if owner_deleted != Some(false) {
                return Err(GuardError::Validation(format!(
                    "{} {} belongs to deleted tenant {}; restore the tenant first",
                    table, id, owner
                )));
            }
        }

        let (action, details) = if table == TENANTS {
            let granted = mark_tenant_restored(conn, id).await?;
            ("tenant_restored".to_string(), json!({ "super_admin_grants": granted, "children_restored": false }))
        } else {
            sqlx::query(&format!(
                "UPDATE {} SET deleted_at = NULL WHERE id = $1 AND deleted_at IS NOT NULL",
                quote_identifier(table)
            ))
            .bind(id)
            .execute(&mut *conn)
            .await?;
            if table == USERS {
                resync_user(conn, id).await?;
            }
            (format!("{}_restored", entity_name(table)), json!({ "table": table }))
        };

        let mut entry = AuditEntry::new(ctx, action, entity_name(table), Some(id)).with_details(details);
        if let Some(owner) = row.owner.or((table == TENANTS).then_some(id)) {
            entry = entry.with_tenant(owner);
        }
        self.audit.record(conn, &entry).await
    }
}

/// Check the table shape, then lock the row. Missing ids are `NotFound`.
async fn lock_row(conn: &mut PgConnection, table: &str, id: i64) -> Result<LockedRow, GuardError> {
    schema::require_columns(conn, table, &["id", schema::DELETED_AT]).await?;
    let owner_expr = if table != TENANTS && schema::column_exists(conn, table, schema::TENANT_ID).await? {
        "tenant_id::bigint"
    } else {
        "NULL::bigint"
    };

    let row = sqlx::query(&format!(
        "SELECT deleted_at IS NOT NULL AS deleted, {} AS owner FROM {} WHERE id = $1 FOR UPDATE",
        owner_expr,
        quote_identifier(table)
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| GuardError::NotFound(format!("{} {}", table, id)))?;

    Ok(LockedRow { deleted: row.try_get("deleted")?, owner: row.try_get("owner")? })
}

/// Deleting or restoring a user takes an admin, and a super_admin row takes a super_admin
async fn authorize_user_row(conn: &mut PgConnection, ctx: &AuthContext, user_id: i64, action: &str) -> Result<(), GuardError> {
    ctx.require_admin(action)?;
    let role: String = sqlx::query_scalar("SELECT role FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await?;
    let role = Role::try_from(role).map_err(|e| GuardError::Constraint(e.to_string()))?;
    if role == Role::SuperAdmin && ctx.role != Role::SuperAdmin {
        tracing::warn!(
            "Rejected '{}' on super_admin {} by {:?} (request {})",
            action, user_id, ctx.user_id, ctx.request_id
        );
        return Err(GuardError::Forbidden(format!("'{}' on a super_admin requires super_admin", action)));
    }
    Ok(())
}

/// A restored user gets the derived grants their role implies
async fn resync_user(conn: &mut PgConnection, user_id: i64) -> Result<(), GuardError> {
    let row = sqlx::query("SELECT tenant_id, role FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await?;
    let role: String = row.try_get("role")?;
    let role = Role::try_from(role).map_err(|e| GuardError::Constraint(e.to_string()))?;
    grants::sync_user_grants(conn, user_id, row.try_get("tenant_id")?, role).await
}

fn bind_param<'q>(
    q: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
    v: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
    match v {
        Value::Null => {
            let none: Option<String> = None;
            q.bind(none)
        }
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(n.to_string())
            }
        }
        Value::String(s) => q.bind(s),
        Value::Array(_) | Value::Object(_) => q.bind(v.clone()),
    }
}
