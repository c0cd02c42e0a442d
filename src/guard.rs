//! Entry point for the API layer: the three guard operations plus the
//! tenant and user services, all sharing one pool and one audit sink.

use sqlx::PgPool;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::audit::AuditSink;
use crate::auth::AuthContext;
use crate::config::AppConfig;
use crate::database::models::{Tenant, TenantId};
use crate::error::GuardError;
use crate::services::{
    AccessSubject, CascadingTenantDeactivator, DeactivationReport, SoftDeleteStore, TenantAccessResolver,
    TenantService, UserService,
};

pub struct Guard {
    pool: PgPool,
    store: SoftDeleteStore,
    resolver: TenantAccessResolver,
    deactivator: CascadingTenantDeactivator,
    tenants: TenantService,
    users: UserService,
}

impl Guard {
    pub fn new(pool: PgPool, config: &AppConfig, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            store: SoftDeleteStore::new(pool.clone(), audit.clone()).with_max_limit(config.guard.max_limit),
            resolver: TenantAccessResolver::new(pool.clone()),
            deactivator: CascadingTenantDeactivator::new(
                pool.clone(),
                audit.clone(),
                config.guard.tenant_scoped_tables.clone(),
            ),
            tenants: TenantService::new(pool.clone(), audit.clone()),
            users: UserService::new(pool.clone(), audit),
            pool,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn soft_delete(&self, ctx: &AuthContext, table: &str, id: i64) -> Result<(), GuardError> {
        self.store.soft_delete(ctx, table, id).await
    }

    pub async fn resolve_accessible_tenants(&self, subject: &AccessSubject) -> Result<BTreeSet<TenantId>, GuardError> {
        self.resolver.resolve_accessible_tenants(subject).await
    }

    pub async fn deactivate_tenant(&self, ctx: &AuthContext, tenant_id: TenantId) -> Result<DeactivationReport, GuardError> {
        self.deactivator.deactivate(ctx, tenant_id).await
    }

    pub async fn restore_tenant(&self, ctx: &AuthContext, tenant_id: TenantId) -> Result<Tenant, GuardError> {
        self.deactivator.restore(ctx, tenant_id).await
    }

    pub fn store(&self) -> &SoftDeleteStore {
        &self.store
    }

    pub fn resolver(&self) -> &TenantAccessResolver {
        &self.resolver
    }

    pub fn tenants(&self) -> &TenantService {
        &self.tenants
    }

    pub fn users(&self) -> &UserService {
        &self.users
    }
}
