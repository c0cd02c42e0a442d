use serde_json::json;
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;

use crate::audit::{AuditEntry, AuditSink};
use crate::auth::AuthContext;
use crate::database::models::{NewUser, Role, TenantId, User, UserId};
use crate::error::GuardError;
use crate::services::access::authorize_tenant;
use crate::services::{abort, begin, commit, grants};

pub(crate) const USER_COLUMNS: &str = "id, tenant_id, name, email, role, created_at, updated_at, deleted_at";

pub struct UserService {
    pool: PgPool,
    audit: Arc<dyn AuditSink>,
}

impl UserService {
    pub fn new(pool: PgPool, audit: Arc<dyn AuditSink>) -> Self {
        Self { pool, audit }
    }

    /// Create a user in a live tenant and materialize the grants their role implies
    pub async fn create_user(&self, ctx: &AuthContext, new_user: NewUser) -> Result<User, GuardError> {
        ctx.require_admin("user.create")?;
        if new_user.role == Role::SuperAdmin {
            ctx.require_super_admin("user.create_super_admin")?;
        }
        validate_new_user(&new_user).map_err(GuardError::Validation)?;

        let mut tx = begin(&self.pool).await?;
        match self.insert_user(&mut tx, ctx, &new_user).await {
            Ok(user) => {
                commit(tx).await?;
                tracing::info!("Created user {} ({}) in tenant {}", user.id, user.role, user.tenant_id);
                Ok(user)
            }
            Err(e) => Err(abort(tx, e).await),
        }
    }

    async fn insert_user(&self, conn: &mut PgConnection, ctx: &AuthContext, new_user: &NewUser) -> Result<User, GuardError> {
        require_live_tenant(conn, new_user.tenant_id).await?;
        authorize_tenant(conn, ctx, Some(new_user.tenant_id)).await?;

        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (tenant_id, name, email, role) VALUES ($1, $2, $3, $4) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(new_user.tenant_id)
        .bind(new_user.name.trim())
        .bind(new_user.email.trim().to_lowercase())
        .bind(new_user.role.as_str())
        .fetch_one(&mut *conn)
        .await?;

        grants::sync_user_grants(conn, user.id, user.tenant_id, user.role).await?;

        let entry = AuditEntry::new(ctx, "user_created", "user", Some(user.id))
            .with_tenant(user.tenant_id)
            .with_details(json!({ "email": user.email, "role": user.role.as_str() }));
        self.audit.record(conn, &entry).await?;
        Ok(user)
    }

    /// Change a live user's role; grants follow in the same transaction
    pub async fn change_role(&self, ctx: &AuthContext, user_id: UserId, role: Role) -> Result<User, GuardError> {
        ctx.require_super_admin("user.change_role")?;

        let mut tx = begin(&self.pool).await?;
        match self.update_role(&mut tx, ctx, user_id, role).await {
            Ok(user) => {
                commit(tx).await?;
                tracing::info!("User {} is now {}", user_id, role);
                Ok(user)
            }
            Err(e) => Err(abort(tx, e).await),
        }
    }

    async fn update_role(&self, conn: &mut PgConnection, ctx: &AuthContext, user_id: UserId, role: Role) -> Result<User, GuardError> {
        let current = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| GuardError::NotFound(format!("user {}", user_id)))?;

        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET role = $2, updated_at = now() WHERE id = $1 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(user_id)
        .bind(role.as_str())
        .fetch_one(&mut *conn)
        .await?;

        grants::sync_user_grants(conn, user.id, user.tenant_id, user.role).await?;

        let entry = AuditEntry::new(ctx, "user_role_changed", "user", Some(user_id))
            .with_tenant(user.tenant_id)
            .with_details(json!({ "from": current.role.as_str(), "to": role.as_str() }));
        self.audit.record(conn, &entry).await?;
        Ok(user)
    }

    /// Explicit grant of `tenant_id` to a user. Returns false if a grant already existed.
    pub async fn grant_access(&self, ctx: &AuthContext, user_id: UserId, tenant_id: TenantId) -> Result<bool, GuardError> {
        ctx.require_admin("user.grant")?;

        let mut tx = begin(&self.pool).await?;
        let result = async {
            authorize_tenant(&mut tx, ctx, Some(tenant_id)).await?;
            let inserted = grants::grant_explicit(&mut tx, user_id, tenant_id, ctx.user_id).await?;
            if inserted {
                let entry = AuditEntry::new(ctx, "access_granted", "tenant_access_grant", Some(user_id))
                    .with_tenant(tenant_id)
                    .with_details(json!({ "user_id": user_id, "tenant_id": tenant_id }));
                self.audit.record(&mut tx, &entry).await?;
            }
            Ok::<_, GuardError>(inserted)
        }
        .await;

        match result {
            Ok(inserted) => {
                commit(tx).await?;
                tracing::info!("Granted tenant {} to user {} (new: {})", tenant_id, user_id, inserted);
                Ok(inserted)
            }
            Err(e) => Err(abort(tx, e).await),
        }
    }

    pub async fn revoke_access(&self, ctx: &AuthContext, user_id: UserId, tenant_id: TenantId) -> Result<(), GuardError> {
        ctx.require_admin("user.revoke")?;

        let mut tx = begin(&self.pool).await?;
        let result = async {
            authorize_tenant(&mut tx, ctx, Some(tenant_id)).await?;
            grants::revoke_explicit(&mut tx, user_id, tenant_id).await?;
            let entry = AuditEntry::new(ctx, "access_revoked", "tenant_access_grant", Some(user_id))
                .with_tenant(tenant_id)
                .with_details(json!({ "user_id": user_id, "tenant_id": tenant_id }));
            self.audit.record(&mut tx, &entry).await
        }
        .await;

        match result {
            Ok(()) => {
                commit(tx).await?;
                tracing::info!("Revoked tenant {} from user {}", tenant_id, user_id);
                Ok(())
            }
            Err(e) => Err(abort(tx, e).await),
        }
    }

    /// Live user by id
    pub async fn get_user(&self, user_id: UserId) -> Result<Option<User>, GuardError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = $1 AND deleted_at IS NULL",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn list_users(&self, tenant_id: TenantId, include_deleted: bool) -> Result<Vec<User>, GuardError> {
        let filter = if include_deleted { "" } else { "AND deleted_at IS NULL" };
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE tenant_id = $1 {} ORDER BY id",
            USER_COLUMNS, filter
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }
}

async fn require_live_tenant(conn: &mut PgConnection, tenant_id: TenantId) -> Result<(), GuardError> {
    let deleted: Option<bool> = sqlx::query_scalar("SELECT deleted_at IS NOT NULL FROM tenants WHERE id = $1 FOR SHARE")
        .bind(tenant_id)
        .fetch_optional(&mut *conn)
        .await?;
    match deleted {
        None => Err(GuardError::NotFound(format!("tenant {}", tenant_id))),
        Some(true) => Err(GuardError::Validation(format!("tenant {} is deleted", tenant_id))),
        Some(false) => Ok(()),
    }
}

fn validate_new_user(new_user: &NewUser) -> Result<(), String> {
    let name = new_user.name.trim();
    if name.is_empty() || name.len() > 255 {
        return Err("user name must be between 1 and 255 characters".to_string());
    }
    let email = new_user.email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(format!("'{}' is not a valid email address", email)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(name: &str, email: &str) -> NewUser {
        NewUser { tenant_id: 1, name: name.to_string(), email: email.to_string(), role: Role::User }
    }

    #[test]
    fn accepts_plain_user() {
        assert!(validate_new_user(&new_user("Mario Rossi", "mario@example.it")).is_ok());
    }

    #[test]
    fn rejects_blank_name_and_bad_email() {
        assert!(validate_new_user(&new_user("  ", "mario@example.it")).is_err());
        assert!(validate_new_user(&new_user("Mario", "mario")).is_err());
        assert!(validate_new_user(&new_user("Mario", "@example.it")).is_err());
        assert!(validate_new_user(&new_user("Mario", "mario@localhost")).is_err());
    }
}
