#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use nexio_guard::audit::{AuditSink, DatabaseAuditSink};
use nexio_guard::auth::AuthContext;
use nexio_guard::config::{AppConfig, Environment};
use nexio_guard::database::models::{NewTenant, NewUser, Role, Tenant, TenantId, User};
use nexio_guard::database::MigrationRunner;
use nexio_guard::Guard;

/// A migrated database shared by every test; tests isolate themselves by
/// creating their own tenants with unique names.
pub struct TestDb {
    pub pool: PgPool,
    pub config: AppConfig,
}

/// None when DATABASE_URL is unset, so the suite passes without Postgres
pub async fn test_db() -> Result<Option<TestDb>> {
    let _ = dotenvy::dotenv();
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping database test");
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .context("failed to connect to DATABASE_URL")?;
    MigrationRunner::new(pool.clone()).run().await?;

    let mut config = AppConfig::preset(Environment::Development);
    config.database.url = Some(url);
    Ok(Some(TestDb { pool, config }))
}

impl TestDb {
    pub fn guard(&self) -> Guard {
        self.guard_with(Arc::new(DatabaseAuditSink))
    }

    pub fn guard_with(&self, audit: Arc<dyn AuditSink>) -> Guard {
        Guard::new(self.pool.clone(), &self.config, audit)
    }
}

pub fn unique(prefix: &str) -> String {
    format!("{} {}", prefix, &Uuid::new_v4().simple().to_string()[..12])
}

pub async fn create_tenant(guard: &Guard, name: &str) -> Result<Tenant> {
    let tenant = guard
        .tenants()
        .create_tenant(
            &AuthContext::system(),
            NewTenant { name: unique(name), vat_number: Some("IT01234567890".to_string()), tax_code: None },
        )
        .await?;
    Ok(tenant)
}

pub async fn create_user(guard: &Guard, tenant_id: TenantId, role: Role) -> Result<User> {
    let tag = Uuid::new_v4().simple().to_string();
    let user = guard
        .users()
        .create_user(
            &AuthContext::system(),
            NewUser {
                tenant_id,
                name: format!("{} {}", role, &tag[..8]),
                email: format!("{}@nexio.test", tag),
                role,
            },
        )
        .await?;
    Ok(user)
}

pub async fn insert_file(pool: &PgPool, tenant_id: TenantId) -> Result<i64> {
    let id = sqlx::query_scalar("INSERT INTO files (tenant_id, name) VALUES ($1, $2) RETURNING id")
        .bind(tenant_id)
        .bind(unique("file"))
        .fetch_one(pool)
        .await?;
    Ok(id)
}

pub async fn insert_project(pool: &PgPool, tenant_id: TenantId) -> Result<i64> {
    let id = sqlx::query_scalar("INSERT INTO projects (tenant_id, name) VALUES ($1, $2) RETURNING id")
        .bind(tenant_id)
        .bind(unique("project"))
        .fetch_one(pool)
        .await?;
    Ok(id)
}

/// A tenant populated with `users` plain users, `files` files and `projects` projects
pub struct Seeded {
    pub tenant: Tenant,
    pub users: Vec<User>,
    pub files: Vec<i64>,
    pub projects: Vec<i64>,
}

pub async fn seed_tenant(db: &TestDb, guard: &Guard, users: usize, files: usize, projects: usize) -> Result<Seeded> {
    let tenant = create_tenant(guard, "Test Company").await?;
    let mut seeded = Seeded { tenant, users: vec![], files: vec![], projects: vec![] };
    for _ in 0..users {
        seeded.users.push(create_user(guard, seeded.tenant.id, Role::User).await?);
    }
    for _ in 0..files {
        seeded.files.push(insert_file(&db.pool, seeded.tenant.id).await?);
    }
    for _ in 0..projects {
        seeded.projects.push(insert_project(&db.pool, seeded.tenant.id).await?);
    }
    Ok(seeded)
}

pub async fn audit_actions(pool: &PgPool, entity_type: &str, entity_id: i64) -> Result<Vec<String>> {
    let actions = sqlx::query_scalar(
        "SELECT action FROM audit_logs WHERE entity_type = $1 AND entity_id = $2 ORDER BY id",
    )
    .bind(entity_type)
    .bind(entity_id)
    .fetch_all(pool)
    .await?;
    Ok(actions)
}

pub async fn live_count(pool: &PgPool, table: &str, tenant_id: TenantId) -> Result<i64> {
    let count = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {} WHERE tenant_id = $1 AND deleted_at IS NULL",
        table
    ))
    .bind(tenant_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn grants_to(pool: &PgPool, tenant_id: TenantId) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM tenant_access_grants WHERE tenant_id = $1")
        .bind(tenant_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}
