use serde_json::json;
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;

use crate::audit::{AuditEntry, AuditSink};
use crate::auth::AuthContext;
use crate::database::models::{NewTenant, Tenant, TenantId, TenantStatus};
use crate::error::GuardError;
use crate::services::{abort, begin, commit, grants};

pub(crate) const TENANT_COLUMNS: &str = "id, name, vat_number, tax_code, status, created_at, updated_at, deleted_at";

/// Row-lock a tenant for the rest of the transaction, deleted or not
pub(crate) async fn lock_tenant(conn: &mut PgConnection, tenant_id: TenantId) -> Result<Option<Tenant>, GuardError> {
    let tenant = sqlx::query_as::<_, Tenant>(&format!(
        "SELECT {} FROM tenants WHERE id = $1 FOR UPDATE",
        TENANT_COLUMNS
    ))
    .bind(tenant_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(tenant)
}

/// Soft-delete the tenant row itself and drop every grant pointing at it
pub(crate) async fn mark_tenant_deleted(conn: &mut PgConnection, tenant_id: TenantId) -> Result<u64, GuardError> {
    sqlx::query(
        "UPDATE tenants SET deleted_at = now(), status = 'inactive', updated_at = now()
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(tenant_id)
    .execute(&mut *conn)
    .await?;
    grants::revoke_tenant_grants(conn, tenant_id).await
}

/// Undo `mark_tenant_deleted` on the tenant row only; children stay as they are
pub(crate) async fn mark_tenant_restored(conn: &mut PgConnection, tenant_id: TenantId) -> Result<u64, GuardError> {
    sqlx::query(
        "UPDATE tenants SET deleted_at = NULL, status = 'active', updated_at = now()
         WHERE id = $1 AND deleted_at IS NOT NULL",
    )
    .bind(tenant_id)
    .execute(&mut *conn)
    .await?;
    grants::materialize_super_admin_grants(conn, tenant_id).await
}

pub struct TenantService {
    pool: PgPool,
    audit: Arc<dyn AuditSink>,
}

impl TenantService {
    pub fn new(pool: PgPool, audit: Arc<dyn AuditSink>) -> Self {
        Self { pool, audit }
    }

    /// Create a tenant and give every super_admin access to it
    pub async fn create_tenant(&self, ctx: &AuthContext, new_tenant: NewTenant) -> Result<Tenant, GuardError> {
        ctx.require_super_admin("tenant.create")?;
        new_tenant.validate().map_err(GuardError::Validation)?;

        let mut tx = begin(&self.pool).await?;
        match self.insert_tenant(&mut tx, ctx, &new_tenant).await {
            Ok(tenant) => {
                commit(tx).await?;
                tracing::info!("Created tenant {} '{}'", tenant.id, tenant.name);
                Ok(tenant)
            }
            Err(e) => Err(abort(tx, e).await),
        }
    }

    async fn insert_tenant(&self, conn: &mut PgConnection, ctx: &AuthContext, new_tenant: &NewTenant) -> Result<Tenant, GuardError> {
        let blank_to_none = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);

        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            "INSERT INTO tenants (name, vat_number, tax_code) VALUES ($1, $2, $3) RETURNING {}",
            TENANT_COLUMNS
        ))
        .bind(new_tenant.name.trim())
        .bind(blank_to_none(&new_tenant.vat_number))
        .bind(blank_to_none(&new_tenant.tax_code))
        .fetch_one(&mut *conn)
        .await?;

        let granted = grants::materialize_super_admin_grants(conn, tenant.id).await?;

        let entry = AuditEntry::new(ctx, "tenant_created", "tenant", Some(tenant.id))
            .with_tenant(tenant.id)
            .with_details(json!({ "name": tenant.name, "super_admin_grants": granted }));
        self.audit.record(conn, &entry).await?;
        Ok(tenant)
    }

    /// Live tenant by id
    pub async fn get_tenant(&self, tenant_id: TenantId) -> Result<Option<Tenant>, GuardError> {
        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {} FROM tenants WHERE id = $1 AND deleted_at IS NULL",
            TENANT_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tenant)
    }

    /// Tenant by id including soft-deleted ones
    pub async fn get_tenant_any(&self, tenant_id: TenantId) -> Result<Option<Tenant>, GuardError> {
        let tenant = sqlx::query_as::<_, Tenant>(&format!("SELECT {} FROM tenants WHERE id = $1", TENANT_COLUMNS))
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tenant)
    }

    pub async fn list_tenants(&self, include_deleted: bool) -> Result<Vec<Tenant>, GuardError> {
        let filter = if include_deleted { "" } else { "WHERE deleted_at IS NULL" };
        let tenants = sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {} FROM tenants {} ORDER BY id",
            TENANT_COLUMNS, filter
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(tenants)
    }

    /// Switch a live tenant between active and inactive, keeping super_admin grants in step
    pub async fn set_status(&self, ctx: &AuthContext, tenant_id: TenantId, status: TenantStatus) -> Result<Tenant, GuardError> {
        ctx.require_super_admin("tenant.set_status")?;

        let mut tx = begin(&self.pool).await?;
        match self.update_status(&mut tx, ctx, tenant_id, status).await {
            Ok(tenant) => {
                commit(tx).await?;
                tracing::info!("Tenant {} is now {}", tenant_id, status.as_str());
                Ok(tenant)
            }
            Err(e) => Err(abort(tx, e).await),
        }
    }

    async fn update_status(
        &self,
        conn: &mut PgConnection,
        ctx: &AuthContext,
        tenant_id: TenantId,
        status: TenantStatus,
    ) -> Result<Tenant, GuardError> {
        let current = lock_tenant(conn, tenant_id)
            .await?
            .ok_or_else(|| GuardError::NotFound(format!("tenant {}", tenant_id)))?;
        if current.is_deleted() {
            return Err(GuardError::AlreadyDeleted(format!("tenant {}", tenant_id)));
        }

        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            "UPDATE tenants SET status = $2, updated_at = now() WHERE id = $1 RETURNING {}",
            TENANT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(status.as_str())
        .fetch_one(&mut *conn)
        .await?;

        let grants_changed = match status {
            TenantStatus::Active => grants::materialize_super_admin_grants(conn, tenant_id).await?,
            TenantStatus::Inactive => grants::revoke_super_admin_grants(conn, tenant_id).await?,
        };

        let entry = AuditEntry::new(ctx, "tenant_status_changed", "tenant", Some(tenant_id))
            .with_tenant(tenant_id)
            .with_details(json!({
                "from": current.status.as_str(),
                "to": status.as_str(),
                "super_admin_grants_changed": grants_changed
            }));
        self.audit.record(conn, &entry).await?;
        Ok(tenant)
    }
}
