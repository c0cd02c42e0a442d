//! Grant table maintenance.
//!
//! Every function here runs on the caller's open transaction. The derived
//! grant rows (`home`, `super_admin`) are rewritten at the moment a role or a
//! tenant's status changes, so the table never needs an after-the-fact backfill.

use serde::Serialize;
use sqlx::{PgConnection, Row};

use crate::database::models::{GrantSource, Role, TenantId, UserId};
use crate::error::GuardError;

/// Bring one user's derived grants in line with their role
pub async fn sync_user_grants(
    conn: &mut PgConnection,
    user_id: UserId,
    home_tenant: TenantId,
    role: Role,
) -> Result<(), GuardError> {
    if role.has_home_grant() {
        sqlx::query(
            "INSERT INTO tenant_access_grants (user_id, tenant_id, source)
             VALUES ($1, $2, 'home')
             ON CONFLICT (user_id, tenant_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(home_tenant)
        .execute(&mut *conn)
        .await?;
    } else {
        sqlx::query("DELETE FROM tenant_access_grants WHERE user_id = $1 AND source = 'home'")
            .bind(user_id)
            .execute(&mut *conn)
            .await?;
    }

    if role == Role::SuperAdmin {
        let inserted = sqlx::query(
            "INSERT INTO tenant_access_grants (user_id, tenant_id, source)
             SELECT $1, t.id, 'super_admin'
             FROM tenants t
             WHERE t.status = 'active' AND t.deleted_at IS NULL
             ON CONFLICT (user_id, tenant_id) DO NOTHING",
        )
        .bind(user_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
        tracing::debug!("Materialized {} super_admin grants for user {}", inserted, user_id);
    } else {
        sqlx::query("DELETE FROM tenant_access_grants WHERE user_id = $1 AND source = 'super_admin'")
            .bind(user_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Give every live super_admin a grant to this tenant
pub async fn materialize_super_admin_grants(conn: &mut PgConnection, tenant_id: TenantId) -> Result<u64, GuardError> {
    let inserted = sqlx::query(
        "INSERT INTO tenant_access_grants (user_id, tenant_id, source)
         SELECT u.id, $1, 'super_admin'
         FROM users u
         WHERE u.role = 'super_admin' AND u.deleted_at IS NULL
         ON CONFLICT (user_id, tenant_id) DO NOTHING",
    )
    .bind(tenant_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(inserted)
}

pub async fn revoke_super_admin_grants(conn: &mut PgConnection, tenant_id: TenantId) -> Result<u64, GuardError> {
    let removed = sqlx::query("DELETE FROM tenant_access_grants WHERE tenant_id = $1 AND source = 'super_admin'")
        .bind(tenant_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(removed)
}

/// Drop every grant pointing at a tenant that is being soft-deleted
pub async fn revoke_tenant_grants(conn: &mut PgConnection, tenant_id: TenantId) -> Result<u64, GuardError> {
    let removed = sqlx::query("DELETE FROM tenant_access_grants WHERE tenant_id = $1")
        .bind(tenant_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(removed)
}

/// Insert an explicit grant. The target tenant must exist and be live.
/// Returns false when the user already had a grant to that tenant.
pub async fn grant_explicit(
    conn: &mut PgConnection,
    user_id: UserId,
    tenant_id: TenantId,
    granted_by: Option<UserId>,
) -> Result<bool, GuardError> {
    let tenant_deleted: Option<bool> =
        sqlx::query_scalar("SELECT deleted_at IS NOT NULL FROM tenants WHERE id = $1 FOR SHARE")
            .bind(tenant_id)
            .fetch_optional(&mut *conn)
            .await?;
    match tenant_deleted {
        None => return Err(GuardError::NotFound(format!("tenant {}", tenant_id))),
        Some(true) => {
            tracing::warn!("Rejected grant of deleted tenant {} to user {}", tenant_id, user_id);
            return Err(GuardError::Validation(format!(
                "tenant {} is deleted; access cannot be granted",
                tenant_id
            )));
        }
        Some(false) => {}
    }

    let user_live: Option<bool> = sqlx::query_scalar("SELECT deleted_at IS NULL FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
    if user_live != Some(true) {
        return Err(GuardError::NotFound(format!("user {}", user_id)));
    }

    let inserted = sqlx::query(
        "INSERT INTO tenant_access_grants (user_id, tenant_id, source, granted_by)
         VALUES ($1, $2, 'explicit', $3)
         ON CONFLICT (user_id, tenant_id) DO NOTHING",
    )
    .bind(user_id)
    .bind(tenant_id)
    .bind(granted_by)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(inserted > 0)
}

pub async fn revoke_explicit(conn: &mut PgConnection, user_id: UserId, tenant_id: TenantId) -> Result<(), GuardError> {
    let removed = sqlx::query(
        "DELETE FROM tenant_access_grants WHERE user_id = $1 AND tenant_id = $2 AND source = 'explicit'",
    )
    .bind(user_id)
    .bind(tenant_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    if removed == 0 {
        return Err(GuardError::NotFound(format!(
            "explicit grant of tenant {} to user {}",
            tenant_id, user_id
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantRef {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub source: GrantSource,
}

/// Differences between the grant table and what roles and tenant status imply
#[derive(Debug, Clone, Default, Serialize)]
pub struct GrantDrift {
    pub missing: Vec<GrantRef>,
    pub stale: Vec<GrantRef>,
}

impl GrantDrift {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.stale.is_empty()
    }
}

/// Read-only consistency check of the whole grant table
pub async fn verify_grants(conn: &mut PgConnection) -> Result<GrantDrift, GuardError> {
    let mut drift = GrantDrift::default();

    let missing_home = sqlx::query(
        "SELECT u.id AS user_id, u.tenant_id
         FROM users u
         JOIN tenants t ON t.id = u.tenant_id AND t.deleted_at IS NULL
         WHERE u.deleted_at IS NULL
           AND u.role IN ('admin', 'super_admin')
           AND NOT EXISTS (
               SELECT 1 FROM tenant_access_grants g
               WHERE g.user_id = u.id AND g.tenant_id = u.tenant_id
           )",
    )
    .fetch_all(&mut *conn)
    .await?;
    for row in missing_home {
        drift.missing.push(GrantRef {
            user_id: row.try_get("user_id")?,
            tenant_id: row.try_get("tenant_id")?,
            source: GrantSource::Home,
        });
    }

    let missing_super = sqlx::query(
        "SELECT u.id AS user_id, t.id AS tenant_id
         FROM users u
         CROSS JOIN tenants t
         WHERE u.deleted_at IS NULL AND u.role = 'super_admin'
           AND t.deleted_at IS NULL AND t.status = 'active'
           AND NOT EXISTS (
               SELECT 1 FROM tenant_access_grants g
               WHERE g.user_id = u.id AND g.tenant_id = t.id
           )",
    )
    .fetch_all(&mut *conn)
    .await?;
    for row in missing_super {
        drift.missing.push(GrantRef {
            user_id: row.try_get("user_id")?,
            tenant_id: row.try_get("tenant_id")?,
            source: GrantSource::SuperAdmin,
        });
    }

    let stale = sqlx::query(
        "SELECT g.user_id, g.tenant_id, g.source
         FROM tenant_access_grants g
         JOIN tenants t ON t.id = g.tenant_id
         JOIN users u ON u.id = g.user_id
         WHERE t.deleted_at IS NOT NULL
            OR (g.source = 'super_admin' AND (u.role <> 'super_admin' OR t.status <> 'active'))
            OR (g.source = 'home' AND (u.role = 'user' OR g.tenant_id <> u.tenant_id))",
    )
    .fetch_all(&mut *conn)
    .await?;
    for row in stale {
        let source: String = row.try_get("source")?;
        drift.stale.push(GrantRef {
            user_id: row.try_get("user_id")?,
            tenant_id: row.try_get("tenant_id")?,
            source: GrantSource::try_from(source).map_err(|e| GuardError::Constraint(e.to_string()))?,
        });
    }

    if !drift.is_clean() {
        tracing::warn!(
            "Grant table drift: {} missing, {} stale",
            drift.missing.len(),
            drift.stale.len()
        );
    }
    Ok(drift)
}
