//! Versioned, forward-only migration ledger.
//!
//! Every schema change ships as a numbered SQL file embedded in the binary.
//! The ledger table records version, name and SHA-256 checksum of each applied
//! file; a checksum mismatch or an applied version this binary does not know
//! about aborts the run. There is no down path.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use sqlx::{Executor, FromRow, PgConnection, PgPool};
use thiserror::Error;
use tracing::{debug, info, warn};

/// pg_advisory_lock key shared by every runner ("nexio" in ASCII)
const MIGRATION_LOCK_KEY: i64 = 0x6e_65_78_69_6f;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration {version} ({name}) was modified after being applied")]
    ChecksumMismatch { version: i64, name: String },

    #[error("Database has migration {0} applied which this build does not know")]
    UnknownVersion(i64),

    #[error("Migration {pending} is pending but {applied} is already applied; migrations are forward-only")]
    OutOfOrder { pending: i64, applied: i64 },

    #[error("Migration versions must be strictly increasing (saw {0} after {1})")]
    UnorderedSource(i64, i64),

    #[error("Migration {version} failed: {source}")]
    Failed { version: i64, source: sqlx::Error },

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

impl Migration {
    pub const fn new(version: i64, name: &'static str, sql: &'static str) -> Self {
        Self { version, name, sql }
    }

    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sql.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

pub static MIGRATIONS: Lazy<Vec<Migration>> = Lazy::new(|| {
    vec![
        Migration::new(1, "create_tenants", include_str!("../../migrations/0001_create_tenants.sql")),
        Migration::new(2, "create_users", include_str!("../../migrations/0002_create_users.sql")),
        Migration::new(
            3,
            "create_tenant_access_grants",
            include_str!("../../migrations/0003_create_tenant_access_grants.sql"),
        ),
        Migration::new(
            4,
            "create_tenant_scoped_entities",
            include_str!("../../migrations/0004_create_tenant_scoped_entities.sql"),
        ),
        Migration::new(5, "create_audit_logs", include_str!("../../migrations/0005_create_audit_logs.sql")),
    ]
});

#[derive(Debug, Clone, FromRow)]
pub struct AppliedMigration {
    pub version: i64,
    pub name: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MigrationStatus {
    pub version: i64,
    pub name: String,
    pub applied_at: Option<DateTime<Utc>>,
}

/// Decide which migrations still need to run, or refuse if the ledger disagrees with the source
pub fn plan<'a>(known: &'a [Migration], applied: &[AppliedMigration]) -> Result<Vec<&'a Migration>, MigrationError> {
    for pair in known.windows(2) {
        if pair[1].version <= pair[0].version {
            return Err(MigrationError::UnorderedSource(pair[1].version, pair[0].version));
        }
    }

    for row in applied {
        let migration = known
            .iter()
            .find(|m| m.version == row.version)
            .ok_or(MigrationError::UnknownVersion(row.version))?;
        if migration.checksum() != row.checksum {
            return Err(MigrationError::ChecksumMismatch { version: row.version, name: row.name.clone() });
        }
    }

    let highest_applied = applied.iter().map(|a| a.version).max();
    let pending: Vec<&Migration> = known
        .iter()
        .filter(|m| !applied.iter().any(|a| a.version == m.version))
        .collect();

    if let (Some(first), Some(highest)) = (pending.first(), highest_applied) {
        if first.version < highest {
            return Err(MigrationError::OutOfOrder { pending: first.version, applied: highest });
        }
    }
    Ok(pending)
}

pub struct MigrationRunner {
    pool: PgPool,
    migrations: &'static [Migration],
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, migrations: MIGRATIONS.as_slice() }
    }

    /// Apply every pending migration; returns the versions applied by this call
    pub async fn run(&self) -> Result<Vec<i64>, MigrationError> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;
        debug!("Acquired migration lock");

        let result = self.run_locked(&mut conn).await;

        if let Err(e) = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await
        {
            warn!("Failed to release migration lock: {}", e);
        }

        result
    }

    async fn run_locked(&self, conn: &mut PgConnection) -> Result<Vec<i64>, MigrationError> {
        Self::ensure_ledger(conn).await?;
        let applied = Self::load_applied(conn).await?;
        let pending = plan(self.migrations, &applied)?;

        if pending.is_empty() {
            info!("Schema is up to date ({} migrations applied)", applied.len());
            return Ok(vec![]);
        }

        let mut done = Vec::with_capacity(pending.len());
        for migration in pending {
            let mut tx = sqlx::Connection::begin(&mut *conn).await?;

            (&mut *tx)
                .execute(migration.sql)
                .await
                .map_err(|source| MigrationError::Failed { version: migration.version, source })?;

            sqlx::query("INSERT INTO schema_migrations (version, name, checksum) VALUES ($1, $2, $3)")
                .bind(migration.version)
                .bind(migration.name)
                .bind(migration.checksum())
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            info!("Applied migration {:04} {}", migration.version, migration.name);
            done.push(migration.version);
        }
        Ok(done)
    }

    /// Applied and pending migrations, in version order
    pub async fn status(&self) -> Result<Vec<MigrationStatus>, MigrationError> {
        let mut conn = self.pool.acquire().await?;
        Self::ensure_ledger(&mut conn).await?;
        let applied = Self::load_applied(&mut conn).await?;

        Ok(self
            .migrations
            .iter()
            .map(|m| MigrationStatus {
                version: m.version,
                name: m.name.to_string(),
                applied_at: applied.iter().find(|a| a.version == m.version).map(|a| a.applied_at),
            })
            .collect())
    }

    async fn ensure_ledger(conn: &mut PgConnection) -> Result<(), MigrationError> {
        (&mut *conn).execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                 version    BIGINT PRIMARY KEY,
                 name       TEXT NOT NULL,
                 checksum   TEXT NOT NULL,
                 applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
             )",
        )
        .await?;
        Ok(())
    }

    async fn load_applied(conn: &mut PgConnection) -> Result<Vec<AppliedMigration>, MigrationError> {
        let rows = sqlx::query_as::<_, AppliedMigration>(
            "SELECT version, name, checksum, applied_at FROM schema_migrations ORDER BY version",
        )
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn applied(m: &Migration) -> AppliedMigration {
        AppliedMigration {
            version: m.version,
            name: m.name.to_string(),
            checksum: m.checksum(),
            applied_at: Utc::now(),
        }
    }

    #[test]
    fn embedded_migrations_are_ordered_and_non_empty() {
        assert!(!MIGRATIONS.is_empty());
        assert!(plan(&MIGRATIONS, &[]).is_ok());
        assert!(MIGRATIONS.iter().all(|m| !m.sql.trim().is_empty()));
    }

    #[test]
    fn fresh_database_runs_everything() {
        let pending = plan(&MIGRATIONS, &[]).unwrap();
        assert_eq!(pending.len(), MIGRATIONS.len());
        assert_eq!(pending[0].version, 1);
    }

    #[test]
    fn applied_prefix_leaves_the_tail() {
        let ledger: Vec<_> = MIGRATIONS.iter().take(2).map(applied).collect();
        let pending = plan(&MIGRATIONS, &ledger).unwrap();
        assert_eq!(pending.first().map(|m| m.version), Some(3));
    }

    #[test]
    fn checksum_drift_aborts() {
        let mut ledger: Vec<_> = MIGRATIONS.iter().take(1).map(applied).collect();
        ledger[0].checksum = "0".repeat(64);
        assert!(matches!(plan(&MIGRATIONS, &ledger), Err(MigrationError::ChecksumMismatch { version: 1, .. })));
    }

    #[test]
    fn unknown_applied_version_aborts() {
        let mut ledger: Vec<_> = MIGRATIONS.iter().map(applied).collect();
        ledger.push(AppliedMigration {
            version: 999,
            name: "fix_missing_column".to_string(),
            checksum: String::new(),
            applied_at: Utc::now(),
        });
        assert!(matches!(plan(&MIGRATIONS, &ledger), Err(MigrationError::UnknownVersion(999))));
    }

    #[test]
    fn gap_behind_applied_version_is_out_of_order() {
        let ledger = vec![applied(&MIGRATIONS[0]), applied(&MIGRATIONS[2])];
        assert!(matches!(
            plan(&MIGRATIONS, &ledger),
            Err(MigrationError::OutOfOrder { pending: 2, applied: 3 })
        ));
    }

    #[test]
    fn source_must_be_strictly_increasing() {
        let source = [Migration::new(2, "b", "SELECT 1"), Migration::new(1, "a", "SELECT 1")];
        assert!(matches!(plan(&source, &[]), Err(MigrationError::UnorderedSource(1, 2))));
    }

    #[test]
    fn checksum_is_sha256_hex() {
        let m = Migration::new(1, "a", "SELECT 1");
        assert_eq!(m.checksum().len(), 64);
        assert_ne!(m.checksum(), Migration::new(1, "a", "SELECT 2").checksum());
    }
}
