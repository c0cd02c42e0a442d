//! Audit sink.
//!
//! Every state change writes exactly one `AuditEntry`. The sink receives the
//! open connection of the operation's transaction so the record commits or
//! rolls back together with the change it describes.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sqlx::PgConnection;
use std::sync::Mutex;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::database::models::{TenantId, UserId};
use crate::error::GuardError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<i64>,
    pub user_id: Option<UserId>,
    pub tenant_id: Option<TenantId>,
    pub details: Value,
    pub request_id: Option<Uuid>,
}

impl AuditEntry {
    pub fn new(ctx: &AuthContext, action: impl Into<String>, entity_type: impl Into<String>, entity_id: Option<i64>) -> Self {
        Self {
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id,
            user_id: ctx.user_id,
            tenant_id: ctx.tenant_id,
            details: Value::Object(Default::default()),
            request_id: Some(ctx.request_id),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, conn: &mut PgConnection, entry: &AuditEntry) -> Result<(), GuardError>;
}

/// Persists entries into `audit_logs`
#[derive(Debug, Default, Clone)]
pub struct DatabaseAuditSink;

#[async_trait]
impl AuditSink for DatabaseAuditSink {
    async fn record(&self, conn: &mut PgConnection, entry: &AuditEntry) -> Result<(), GuardError> {
        sqlx::query(
            "INSERT INTO audit_logs (tenant_id, user_id, action, entity_type, entity_id, details, request_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.tenant_id)
        .bind(entry.user_id)
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(entry.entity_id)
        .bind(&entry.details)
        .bind(entry.request_id)
        .execute(&mut *conn)
        .await?;

        tracing::debug!("Audit record written: {} {} {:?}", entry.action, entry.entity_type, entry.entity_id);
        Ok(())
    }
}

/// Emits entries as structured log events only
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, _conn: &mut PgConnection, entry: &AuditEntry) -> Result<(), GuardError> {
        tracing::info!(
            action = %entry.action,
            entity_type = %entry.entity_type,
            entity_id = ?entry.entity_id,
            user_id = ?entry.user_id,
            details = %entry.details,
            "audit"
        );
        Ok(())
    }
}

/// Keeps entries in memory; used by tests and dry runs
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, _conn: &mut PgConnection, entry: &AuditEntry) -> Result<(), GuardError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| GuardError::Transaction("audit recorder poisoned".to_string()))?;
        entries.push(entry.clone());
        Ok(())
    }
}

/// Pick the sink matching `security.enable_audit_logging`
pub fn sink_for(enable_audit_logging: bool) -> std::sync::Arc<dyn AuditSink> {
    if enable_audit_logging {
        std::sync::Arc::new(DatabaseAuditSink)
    } else {
        std::sync::Arc::new(TracingAuditSink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entry_takes_attribution_from_context() {
        let ctx = AuthContext::system();
        let entry = AuditEntry::new(&ctx, "tenant_deactivated", "tenant", Some(2))
            .with_details(json!({ "users": 3 }))
            .with_tenant(2);
        assert_eq!(entry.user_id, None);
        assert_eq!(entry.tenant_id, Some(2));
        assert_eq!(entry.request_id, Some(ctx.request_id));
        assert_eq!(entry.details["users"], 3);
    }
}
