pub mod access;
pub mod deactivator;
pub mod grants;
pub mod soft_delete;
pub mod tenant_service;
pub mod user_service;

pub use access::{AccessSubject, TenantAccessResolver};
pub use deactivator::{CascadingTenantDeactivator, DeactivationReport};
pub use soft_delete::SoftDeleteStore;
pub use tenant_service::TenantService;
pub use user_service::UserService;

use sqlx::{PgPool, Postgres, Transaction};

use crate::error::GuardError;

pub(crate) async fn begin(pool: &PgPool) -> Result<Transaction<'static, Postgres>, GuardError> {
    pool.begin()
        .await
        .map_err(|e| GuardError::Transaction(format!("begin failed: {}", e)))
}

pub(crate) async fn commit(tx: Transaction<'static, Postgres>) -> Result<(), GuardError> {
    tx.commit()
        .await
        .map_err(|e| GuardError::Transaction(format!("commit failed: {}", e)))
}

/// Roll back after a failed unit of work, keeping the original error
pub(crate) async fn abort(tx: Transaction<'static, Postgres>, err: GuardError) -> GuardError {
    if let Err(rollback_err) = tx.rollback().await {
        tracing::error!("Rollback failed after '{}': {}", err, rollback_err);
    }
    err
}

/// Entity name used in audit actions: `files` -> `file`. Tables outside the
/// known schema keep their table name.
pub fn entity_name(table: &str) -> &str {
    match table {
        "tenants" => "tenant",
        "users" => "user",
        "files" => "file",
        "projects" => "project",
        "tenant_access_grants" => "tenant_access_grant",
        "audit_logs" => "audit_log",
        other => other,
    }
}
