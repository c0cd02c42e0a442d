use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use std::collections::BTreeSet;

use crate::auth::AuthContext;
use crate::database::models::{Role, TenantId, User, UserId};
use crate::error::GuardError;

/// The user facts access resolution depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessSubject {
    pub id: UserId,
    pub tenant_id: TenantId,
    pub role: Role,
}

impl From<&User> for AccessSubject {
    fn from(user: &User) -> Self {
        Self { id: user.id, tenant_id: user.tenant_id, role: user.role }
    }
}

impl AccessSubject {
    /// None for the system context, which has no home tenant
    pub fn from_context(ctx: &AuthContext) -> Option<Self> {
        Some(Self { id: ctx.user_id?, tenant_id: ctx.tenant_id?, role: ctx.role })
    }
}

/// Access rule, independent of storage.
///
/// `grants` are the tenant ids of the subject's grant rows, `live` the ids of
/// tenants that are active and not soft-deleted. The result never contains a
/// tenant outside `live`.
pub fn resolve_policy(subject: &AccessSubject, grants: &BTreeSet<TenantId>, live: &BTreeSet<TenantId>) -> BTreeSet<TenantId> {
    match subject.role {
        Role::SuperAdmin => live.clone(),
        Role::Admin => grants
            .iter()
            .copied()
            .chain(std::iter::once(subject.tenant_id))
            .filter(|id| live.contains(id))
            .collect(),
        Role::User => std::iter::once(subject.tenant_id).filter(|id| live.contains(id)).collect(),
    }
}

pub struct TenantAccessResolver {
    pool: PgPool,
}

impl TenantAccessResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Tenants this subject may act on. Pure read.
    pub async fn resolve_accessible_tenants(&self, subject: &AccessSubject) -> Result<BTreeSet<TenantId>, GuardError> {
        let mut conn = self.pool.acquire().await?;
        resolve_on(&mut conn, subject).await
    }

    /// Like `resolve_accessible_tenants`, reading role and home tenant from the live user row
    pub async fn resolve_for_user(&self, user_id: UserId) -> Result<BTreeSet<TenantId>, GuardError> {
        let mut conn = self.pool.acquire().await?;
        let user = sqlx::query_as::<_, User>(
            "SELECT id, tenant_id, name, email, role, created_at, updated_at, deleted_at
             FROM users WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| GuardError::NotFound(format!("user {}", user_id)))?;

        resolve_on(&mut conn, &AccessSubject::from(&user)).await
    }

    pub async fn can_access(&self, subject: &AccessSubject, tenant_id: TenantId) -> Result<bool, GuardError> {
        Ok(self.resolve_accessible_tenants(subject).await?.contains(&tenant_id))
    }
}

/// Resolution on an existing connection, so writers can check access inside their transaction
pub(crate) async fn resolve_on(conn: &mut PgConnection, subject: &AccessSubject) -> Result<BTreeSet<TenantId>, GuardError> {
    let live: BTreeSet<TenantId> = sqlx::query_scalar(
        "SELECT id FROM tenants WHERE status = 'active' AND deleted_at IS NULL",
    )
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .collect();

    let grants: BTreeSet<TenantId> = if subject.role == Role::Admin {
        sqlx::query_scalar("SELECT tenant_id FROM tenant_access_grants WHERE user_id = $1")
            .bind(subject.id)
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .collect()
    } else {
        BTreeSet::new()
    };

    let resolved = resolve_policy(subject, &grants, &live);
    tracing::debug!("User {} ({}) resolves to {} tenants", subject.id, subject.role, resolved.len());
    Ok(resolved)
}

/// Authorize a write against a row owned by `owner`. The system context and
/// super_admins pass; everyone else must be able to access the owning tenant.
pub(crate) async fn authorize_tenant(
    conn: &mut PgConnection,
    ctx: &AuthContext,
    owner: Option<TenantId>,
) -> Result<(), GuardError> {
    if ctx.role == Role::SuperAdmin {
        return Ok(());
    }
    let subject = AccessSubject::from_context(ctx)
        .ok_or_else(|| GuardError::Forbidden("no authenticated user".to_string()))?;
    let Some(owner) = owner else {
        return Err(GuardError::Forbidden("only super_admin may modify rows outside a tenant".to_string()));
    };
    if resolve_on(conn, &subject).await?.contains(&owner) {
        Ok(())
    } else {
        tracing::warn!("User {} denied access to tenant {} (request {})", subject.id, owner, ctx.request_id);
        Err(GuardError::Forbidden(format!("tenant {} is not accessible", owner)))
    }
}
