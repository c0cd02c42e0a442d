mod common;

use anyhow::Result;
use sqlx::Executor;
use std::sync::Arc;

use nexio_guard::audit::RecordingAuditSink;
use nexio_guard::auth::AuthContext;
use nexio_guard::database::models::{Role, TenantStatus};
use nexio_guard::services::{AccessSubject, CascadingTenantDeactivator};
use nexio_guard::GuardError;

#[tokio::test]
async fn deactivation_cascades_into_every_owned_row() -> Result<()> {
    let Some(db) = common::test_db().await? else { return Ok(()) };
    let guard = db.guard();
    let system = AuthContext::system();
    let seeded = common::seed_tenant(&db, &guard, 3, 5, 2).await?;
    let tenant_id = seeded.tenant.id;
    let other = common::create_tenant(&guard, "Bystander").await?;
    let root = common::create_user(&guard, other.id, Role::SuperAdmin).await?;
    assert!(guard.resolve_accessible_tenants(&AccessSubject::from(&root)).await?.contains(&tenant_id));

    let report = guard.deactivate_tenant(&system, tenant_id).await?;
    assert_eq!(report.tenant_id, tenant_id);
    assert_eq!(report.users_affected, 3);
    assert_eq!(report.files_affected, 5);
    assert_eq!(report.projects_affected, 2);
    assert!(report.grants_revoked >= 1);

    assert!(!guard.resolve_accessible_tenants(&AccessSubject::from(&root)).await?.contains(&tenant_id));
    for table in ["users", "files", "projects"] {
        assert_eq!(common::live_count(&db.pool, table, tenant_id).await?, 0, "{} still live", table);
    }
    assert_eq!(common::grants_to(&db.pool, tenant_id).await?, 0);

    let tenant = guard.tenants().get_tenant_any(tenant_id).await?.expect("tenant row kept");
    assert_eq!(tenant.status, TenantStatus::Inactive);
    assert!(tenant.deleted_at.is_some());
    assert!(guard.tenants().get_tenant(tenant_id).await?.is_none());

    let details: serde_json::Value = sqlx::query_scalar(
        "SELECT details FROM audit_logs WHERE action = 'tenant_deactivated' AND entity_id = $1",
    )
    .bind(tenant_id)
    .fetch_one(&db.pool)
    .await?;
    assert_eq!(details["cascade"]["files"], 5);

    let again = guard.deactivate_tenant(&system, tenant_id).await;
    assert!(matches!(again, Err(GuardError::AlreadyDeleted(_))), "got {:?}", again);
    Ok(())
}

#[tokio::test]
async fn earlier_deletions_keep_their_timestamp() -> Result<()> {
    let Some(db) = common::test_db().await? else { return Ok(()) };
    let guard = db.guard();
    let system = AuthContext::system();
    let seeded = common::seed_tenant(&db, &guard, 0, 2, 0).await?;

    guard.soft_delete(&system, "files", seeded.files[0]).await?;
    let before: chrono::DateTime<chrono::Utc> = sqlx::query_scalar("SELECT deleted_at FROM files WHERE id = $1")
        .bind(seeded.files[0])
        .fetch_one(&db.pool)
        .await?;

    let report = guard.deactivate_tenant(&system, seeded.tenant.id).await?;
    assert_eq!(report.files_affected, 1);

    let after: chrono::DateTime<chrono::Utc> = sqlx::query_scalar("SELECT deleted_at FROM files WHERE id = $1")
        .bind(seeded.files[0])
        .fetch_one(&db.pool)
        .await?;
    assert_eq!(before, after);
    Ok(())
}

#[tokio::test]
async fn restore_brings_back_the_tenant_only() -> Result<()> {
    let Some(db) = common::test_db().await? else { return Ok(()) };
    let guard = db.guard();
    let system = AuthContext::system();
    let seeded = common::seed_tenant(&db, &guard, 2, 3, 1).await?;
    let tenant_id = seeded.tenant.id;
    let root = common::create_user(&guard, tenant_id, Role::SuperAdmin).await?;

    guard.deactivate_tenant(&system, tenant_id).await?;
    let restored = guard.restore_tenant(&system, tenant_id).await?;
    assert!(restored.is_live());

    for table in ["users", "files", "projects"] {
        assert_eq!(common::live_count(&db.pool, table, tenant_id).await?, 0, "{} came back", table);
    }

    // root's own row was part of the cascade; another super_admin sees the tenant again
    let other = common::create_tenant(&guard, "Other").await?;
    let watcher = common::create_user(&guard, other.id, Role::SuperAdmin).await?;
    assert!(guard.resolve_accessible_tenants(&AccessSubject::from(&watcher)).await?.contains(&tenant_id));
    assert!(guard.users().get_user(root.id).await?.is_none());

    let again = guard.restore_tenant(&system, tenant_id).await;
    assert!(matches!(again, Err(GuardError::NotDeleted(_))), "got {:?}", again);

    let actions = common::audit_actions(&db.pool, "tenant", tenant_id).await?;
    assert_eq!(actions.last().map(String::as_str), Some("tenant_restored"));
    Ok(())
}

#[tokio::test]
async fn only_super_admins_deactivate() -> Result<()> {
    let Some(db) = common::test_db().await? else { return Ok(()) };
    let guard = db.guard();
    let seeded = common::seed_tenant(&db, &guard, 1, 0, 0).await?;
    let admin = common::create_user(&guard, seeded.tenant.id, Role::Admin).await?;

    let result = guard.deactivate_tenant(&AuthContext::for_user(&admin), seeded.tenant.id).await;
    assert!(matches!(result, Err(GuardError::Forbidden(_))), "got {:?}", result);
    assert_eq!(common::live_count(&db.pool, "users", seeded.tenant.id).await?, 2);

    let missing = guard.deactivate_tenant(&AuthContext::system(), i64::MAX).await;
    assert!(matches!(missing, Err(GuardError::NotFound(_))), "got {:?}", missing);
    Ok(())
}

#[tokio::test]
async fn schema_drift_aborts_the_whole_cascade() -> Result<()> {
    let Some(db) = common::test_db().await? else { return Ok(()) };
    let guard = db.guard();
    let seeded = common::seed_tenant(&db, &guard, 2, 2, 2).await?;
    let audit = Arc::new(RecordingAuditSink::new());

    let tables = vec!["users".to_string(), "files".to_string(), "projects".to_string(), "audit_logs".to_string()];
    let deactivator = CascadingTenantDeactivator::new(db.pool.clone(), audit.clone(), tables);

    let result = deactivator.deactivate(&AuthContext::system(), seeded.tenant.id).await;
    assert!(matches!(result, Err(GuardError::Constraint(_))), "got {:?}", result);

    let tenant = guard.tenants().get_tenant(seeded.tenant.id).await?;
    assert!(tenant.is_some_and(|t| t.is_live()));
    for table in ["users", "files", "projects"] {
        assert_eq!(common::live_count(&db.pool, table, seeded.tenant.id).await?, 2, "{} was touched", table);
    }
    assert!(audit.entries().is_empty());
    Ok(())
}

#[tokio::test]
async fn a_failing_write_mid_cascade_rolls_everything_back() -> Result<()> {
    let Some(db) = common::test_db().await? else { return Ok(()) };
    let guard = db.guard();
    let seeded = common::seed_tenant(&db, &guard, 2, 2, 2).await?;
    let tenant_id = seeded.tenant.id;

    // Projects are updated after users and files; fail them for this tenant only
    let function = format!("fail_project_cascade_{}", tenant_id);
    let trigger = format!("projects_fail_cascade_{}", tenant_id);
    db.pool
        .execute(
            format!(
                "CREATE FUNCTION {function}() RETURNS trigger AS $$
                 BEGIN
                     IF OLD.tenant_id = {tenant_id} THEN
                         RAISE EXCEPTION 'projects are locked for tenant %', OLD.tenant_id;
                     END IF;
                     RETURN NEW;
                 END;
                 $$ LANGUAGE plpgsql;
                 CREATE TRIGGER {trigger} BEFORE UPDATE ON projects
                     FOR EACH ROW EXECUTE FUNCTION {function}();"
            )
            .as_str(),
        )
        .await?;

    let result = guard.deactivate_tenant(&AuthContext::system(), tenant_id).await;

    db.pool
        .execute(format!("DROP TRIGGER {trigger} ON projects; DROP FUNCTION {function}();").as_str())
        .await?;

    assert!(matches!(result, Err(GuardError::Transaction(_))), "got {:?}", result);
    for table in ["users", "files", "projects"] {
        assert_eq!(common::live_count(&db.pool, table, tenant_id).await?, 2, "{} was touched", table);
    }
    let tenant = guard.tenants().get_tenant(tenant_id).await?;
    assert!(tenant.is_some_and(|t| t.is_live()));
    assert!(common::audit_actions(&db.pool, "tenant", tenant_id).await?.iter().all(|a| a != "tenant_deactivated"));
    Ok(())
}
