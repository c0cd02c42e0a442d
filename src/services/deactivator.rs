use serde::Serialize;
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::audit::{AuditEntry, AuditSink};
use crate::auth::AuthContext;
use crate::database::models::{Tenant, TenantId};
use crate::database::schema;
use crate::error::GuardError;
use crate::filter::quote_identifier;
use crate::services::tenant_service::{lock_tenant, mark_tenant_deleted, mark_tenant_restored};
use crate::services::{abort, begin, commit};

/// Rows soft-deleted by one tenant deactivation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeactivationReport {
    pub tenant_id: TenantId,
    pub users_affected: u64,
    pub files_affected: u64,
    pub projects_affected: u64,
    pub grants_revoked: u64,
    /// Every tenant-scoped table, including configured extras
    pub per_table: BTreeMap<String, u64>,
}

impl DeactivationReport {
    fn new(tenant_id: TenantId, per_table: BTreeMap<String, u64>, grants_revoked: u64) -> Self {
        let count = |t: &str| per_table.get(t).copied().unwrap_or(0);
        Self {
            tenant_id,
            users_affected: count("users"),
            files_affected: count("files"),
            projects_affected: count("projects"),
            grants_revoked,
            per_table,
        }
    }

    pub fn total_affected(&self) -> u64 {
        self.per_table.values().sum()
    }
}

/// Cascades a tenant's soft delete into every table it owns, all or nothing
pub struct CascadingTenantDeactivator {
    pool: PgPool,
    audit: Arc<dyn AuditSink>,
    scoped_tables: Vec<String>,
}

impl CascadingTenantDeactivator {
    pub fn new(pool: PgPool, audit: Arc<dyn AuditSink>, scoped_tables: Vec<String>) -> Self {
        Self { pool, audit, scoped_tables }
    }

    pub async fn deactivate(&self, ctx: &AuthContext, tenant_id: TenantId) -> Result<DeactivationReport, GuardError> {
        ctx.require_super_admin("tenant.deactivate")?;

        let mut tx = begin(&self.pool).await?;
        let tenant = match self.precheck(&mut tx, tenant_id).await {
            Ok(tenant) => tenant,
            Err(e) => return Err(abort(tx, e).await),
        };

        // Past the checks, any failure rolls back every write made so far
        match self.cascade(&mut tx, ctx, &tenant).await {
            Ok(report) => {
                commit(tx)
                    .await
                    .map_err(|e| GuardError::Transaction(format!("cascade of tenant {} failed: {}", tenant_id, e)))?;
                tracing::info!(
                    "Deactivated tenant {}: {} users, {} files, {} projects, {} grants revoked",
                    tenant_id,
                    report.users_affected,
                    report.files_affected,
                    report.projects_affected,
                    report.grants_revoked
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!("Deactivation of tenant {} rolled back: {}", tenant_id, e);
                let e = GuardError::Transaction(format!("cascade of tenant {} failed: {}", tenant_id, e));
                Err(abort(tx, e).await)
            }
        }
    }

    /// Lock the tenant and verify every table before the first write
    async fn precheck(&self, conn: &mut PgConnection, tenant_id: TenantId) -> Result<Tenant, GuardError> {
        let tenant = lock_tenant(conn, tenant_id)
            .await?
            .ok_or_else(|| GuardError::NotFound(format!("tenant {}", tenant_id)))?;
        if tenant.is_deleted() {
            return Err(GuardError::AlreadyDeleted(format!("tenant {}", tenant_id)));
        }

        schema::require_soft_delete(conn, "tenants").await?;
        for table in &self.scoped_tables {
            schema::require_tenant_scoped(conn, table).await?;
        }
        Ok(tenant)
    }

    async fn cascade(&self, conn: &mut PgConnection, ctx: &AuthContext, tenant: &Tenant) -> Result<DeactivationReport, GuardError> {
        let tenant_id = tenant.id;
        let mut per_table = BTreeMap::new();
        for table in &self.scoped_tables {
            let affected = sqlx::query(&format!(
                "UPDATE {} SET deleted_at = now() WHERE tenant_id = $1 AND deleted_at IS NULL",
                quote_identifier(table)
            ))
            .bind(tenant_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
            tracing::debug!("Cascade soft-deleted {} rows in {} for tenant {}", affected, table, tenant_id);
            per_table.insert(table.clone(), affected);
        }

        let grants_revoked = mark_tenant_deleted(conn, tenant_id).await?;
        let report = DeactivationReport::new(tenant_id, per_table, grants_revoked);

        let entry = AuditEntry::new(ctx, "tenant_deactivated", "tenant", Some(tenant_id))
            .with_tenant(tenant_id)
            .with_details(json!({
                "tenant_name": tenant.name,
                "cascade": report.per_table,
                "grants_revoked": grants_revoked,
            }));
        self.audit.record(conn, &entry).await?;
        Ok(report)
    }

    /// Bring the tenant back. Rows deleted by the cascade stay deleted.
    pub async fn restore(&self, ctx: &AuthContext, tenant_id: TenantId) -> Result<Tenant, GuardError> {
        ctx.require_super_admin("tenant.restore")?;

        let mut tx = begin(&self.pool).await?;
        match self.restore_tenant_row(&mut tx, ctx, tenant_id).await {
            Ok(tenant) => {
                commit(tx).await?;
                tracing::info!("Restored tenant {}", tenant_id);
                Ok(tenant)
            }
            Err(e) => Err(abort(tx, e).await),
        }
    }

    async fn restore_tenant_row(&self, conn: &mut PgConnection, ctx: &AuthContext, tenant_id: TenantId) -> Result<Tenant, GuardError> {
        let tenant = lock_tenant(conn, tenant_id)
            .await?
            .ok_or_else(|| GuardError::NotFound(format!("tenant {}", tenant_id)))?;
        if !tenant.is_deleted() {
            return Err(GuardError::NotDeleted(format!("tenant {}", tenant_id)));
        }

        let granted = mark_tenant_restored(conn, tenant_id).await?;

        let entry = AuditEntry::new(ctx, "tenant_restored", "tenant", Some(tenant_id))
            .with_tenant(tenant_id)
            .with_details(json!({
                "deleted_at": tenant.deleted_at,
                "super_admin_grants": granted,
                "children_restored": false,
            }));
        self.audit.record(conn, &entry).await?;

        lock_tenant(conn, tenant_id)
            .await?
            .ok_or_else(|| GuardError::NotFound(format!("tenant {}", tenant_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_extracts_named_tables() {
        let per_table: BTreeMap<String, u64> =
            [("users", 3), ("files", 5), ("projects", 2), ("tasks", 7)]
                .into_iter()
                .map(|(t, n)| (t.to_string(), n))
                .collect();
        let report = DeactivationReport::new(2, per_table, 4);
        assert_eq!(report.users_affected, 3);
        assert_eq!(report.files_affected, 5);
        assert_eq!(report.projects_affected, 2);
        assert_eq!(report.total_affected(), 17);
    }

    #[test]
    fn report_defaults_missing_tables_to_zero() {
        let report = DeactivationReport::new(9, BTreeMap::new(), 0);
        assert_eq!(report.files_affected, 0);
    }
}
