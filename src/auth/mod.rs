use serde::Serialize;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::database::models::{Role, TenantId, User, UserId};
use crate::error::GuardError;

/// Request-scoped identity passed explicitly into every mutating operation.
///
/// `role` is the only role field; it is read from `users.role` and nothing else.
#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    /// None for maintenance runs (CLI, migrations)
    pub user_id: Option<UserId>,
    pub tenant_id: Option<TenantId>,
    pub role: Role,
    pub request_id: Uuid,
}

impl AuthContext {
    /// Context for operator tooling; acts with super_admin rights and no user attribution
    pub fn system() -> Self {
        Self {
            user_id: None,
            tenant_id: None,
            role: Role::SuperAdmin,
            request_id: Uuid::new_v4(),
        }
    }

    pub fn for_user(user: &User) -> Self {
        Self {
            user_id: Some(user.id),
            tenant_id: Some(user.tenant_id),
            role: user.role,
            request_id: Uuid::new_v4(),
        }
    }

    /// Build a context for a live user whose home tenant is live
    pub async fn load(conn: &mut PgConnection, user_id: UserId) -> Result<Self, GuardError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT u.id, u.tenant_id, u.name, u.email, u.role, u.created_at, u.updated_at, u.deleted_at
             FROM users u
             JOIN tenants t ON t.id = u.tenant_id
             WHERE u.id = $1 AND u.deleted_at IS NULL AND t.deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| GuardError::NotFound(format!("user {} is not active", user_id)))?;

        tracing::debug!("Loaded auth context for user {} ({}) in tenant {}", user.id, user.role, user.tenant_id);
        Ok(Self::for_user(&user))
    }

    pub fn is_system(&self) -> bool {
        self.user_id.is_none()
    }

    pub fn require_super_admin(&self, action: &str) -> Result<(), GuardError> {
        if self.role == Role::SuperAdmin {
            return Ok(());
        }
        tracing::warn!(
            "Rejected '{}' for user {:?} with role {} (request {})",
            action, self.user_id, self.role, self.request_id
        );
        Err(GuardError::Forbidden(format!("'{}' requires super_admin", action)))
    }

    pub fn require_admin(&self, action: &str) -> Result<(), GuardError> {
        if self.role.has_home_grant() {
            return Ok(());
        }
        tracing::warn!(
            "Rejected '{}' for user {:?} with role {} (request {})",
            action, self.user_id, self.role, self.request_id
        );
        Err(GuardError::Forbidden(format!("'{}' requires admin", action)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: Role) -> AuthContext {
        AuthContext { user_id: Some(7), tenant_id: Some(2), role, request_id: Uuid::new_v4() }
    }

    #[test]
    fn system_context_is_super_admin_without_user() {
        let system = AuthContext::system();
        assert!(system.is_system());
        assert!(system.require_super_admin("tenant.deactivate").is_ok());
    }

    #[test]
    fn role_gates() {
        assert!(ctx(Role::User).require_admin("user.grant").is_err());
        assert!(ctx(Role::Admin).require_admin("user.grant").is_ok());
        assert!(matches!(
            ctx(Role::Admin).require_super_admin("tenant.deactivate"),
            Err(GuardError::Forbidden(_))
        ));
    }

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(AuthContext::system().request_id, AuthContext::system().request_id);
    }
}
