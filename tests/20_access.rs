mod common;

use anyhow::Result;
use std::collections::BTreeSet;

use nexio_guard::auth::AuthContext;
use nexio_guard::database::models::{Role, TenantStatus};
use nexio_guard::services::grants;
use nexio_guard::services::AccessSubject;
use nexio_guard::GuardError;

#[tokio::test]
async fn each_role_resolves_its_own_tenant_set() -> Result<()> {
    let Some(db) = common::test_db().await? else { return Ok(()) };
    let guard = db.guard();
    let a = common::create_tenant(&guard, "Alpha").await?;
    let b = common::create_tenant(&guard, "Beta").await?;
    let c = common::create_tenant(&guard, "Gamma").await?;

    let admin = common::create_user(&guard, a.id, Role::Admin).await?;
    let user = common::create_user(&guard, a.id, Role::User).await?;
    let root = common::create_user(&guard, c.id, Role::SuperAdmin).await?;
    assert!(guard.users().grant_access(&AuthContext::system(), admin.id, b.id).await?);

    let admin_set = guard.resolve_accessible_tenants(&AccessSubject::from(&admin)).await?;
    assert_eq!(admin_set, BTreeSet::from([a.id, b.id]));

    let user_set = guard.resolve_accessible_tenants(&AccessSubject::from(&user)).await?;
    assert_eq!(user_set, BTreeSet::from([a.id]));

    let root_set = guard.resolve_accessible_tenants(&AccessSubject::from(&root)).await?;
    assert!([a.id, b.id, c.id].iter().all(|id| root_set.contains(id)));

    assert!(guard.resolver().can_access(&AccessSubject::from(&admin), b.id).await?);
    assert!(!guard.resolver().can_access(&AccessSubject::from(&user), b.id).await?);
    Ok(())
}

#[tokio::test]
async fn grants_to_deleted_tenants_are_rejected() -> Result<()> {
    let Some(db) = common::test_db().await? else { return Ok(()) };
    let guard = db.guard();
    let system = AuthContext::system();
    let home = common::create_tenant(&guard, "Home").await?;
    let gone = common::create_tenant(&guard, "Gone").await?;
    let admin = common::create_user(&guard, home.id, Role::Admin).await?;

    guard.deactivate_tenant(&system, gone.id).await?;

    let result = guard.users().grant_access(&system, admin.id, gone.id).await;
    assert!(matches!(result, Err(GuardError::Validation(_))), "got {:?}", result);

    // The table itself refuses the row too
    let raw = sqlx::query("INSERT INTO tenant_access_grants (user_id, tenant_id) VALUES ($1, $2)")
        .bind(admin.id)
        .bind(gone.id)
        .execute(&db.pool)
        .await;
    let err = GuardError::from(raw.expect_err("trigger must reject the grant"));
    assert!(matches!(err, GuardError::Constraint(_)), "got {:?}", err);
    Ok(())
}

#[tokio::test]
async fn deactivated_tenants_drop_out_of_every_resolution() -> Result<()> {
    let Some(db) = common::test_db().await? else { return Ok(()) };
    let guard = db.guard();
    let system = AuthContext::system();
    let home = common::create_tenant(&guard, "Home").await?;
    let target = common::create_tenant(&guard, "Target").await?;
    let admin = common::create_user(&guard, home.id, Role::Admin).await?;
    let root = common::create_user(&guard, home.id, Role::SuperAdmin).await?;
    guard.users().grant_access(&system, admin.id, target.id).await?;

    guard.deactivate_tenant(&system, target.id).await?;

    for subject in [AccessSubject::from(&admin), AccessSubject::from(&root)] {
        let resolved = guard.resolve_accessible_tenants(&subject).await?;
        assert!(!resolved.contains(&target.id), "{:?} still resolves {}", subject.role, target.id);
        assert!(resolved.contains(&home.id));
    }
    assert_eq!(common::grants_to(&db.pool, target.id).await?, 0);
    Ok(())
}

#[tokio::test]
async fn role_changes_keep_grants_in_sync() -> Result<()> {
    let Some(db) = common::test_db().await? else { return Ok(()) };
    let guard = db.guard();
    let system = AuthContext::system();
    let home = common::create_tenant(&guard, "Home").await?;
    let extra = common::create_tenant(&guard, "Extra").await?;
    let user = common::create_user(&guard, home.id, Role::User).await?;

    let sources = |user_id: i64| {
        let pool = db.pool.clone();
        async move {
            let rows: Vec<(i64, String)> = sqlx::query_as(
                "SELECT tenant_id, source FROM tenant_access_grants WHERE user_id = $1 ORDER BY tenant_id",
            )
            .bind(user_id)
            .fetch_all(&pool)
            .await?;
            Ok::<_, anyhow::Error>(rows)
        }
    };

    assert!(sources(user.id).await?.is_empty());

    guard.users().change_role(&system, user.id, Role::Admin).await?;
    assert_eq!(sources(user.id).await?, vec![(home.id, "home".to_string())]);

    guard.users().change_role(&system, user.id, Role::SuperAdmin).await?;
    let rows = sources(user.id).await?;
    assert!(rows.contains(&(home.id, "home".to_string())));
    assert!(rows.contains(&(extra.id, "super_admin".to_string())));

    guard.users().change_role(&system, user.id, Role::Admin).await?;
    guard.users().grant_access(&system, user.id, extra.id).await?;
    guard.users().change_role(&system, user.id, Role::User).await?;
    assert_eq!(sources(user.id).await?, vec![(extra.id, "explicit".to_string())]);

    let mut conn = db.pool.acquire().await?;
    let drift = grants::verify_grants(&mut conn).await?;
    assert!(drift.missing.iter().chain(drift.stale.iter()).all(|g| g.user_id != user.id));
    Ok(())
}

#[tokio::test]
async fn inactive_tenants_lose_super_admin_grants() -> Result<()> {
    let Some(db) = common::test_db().await? else { return Ok(()) };
    let guard = db.guard();
    let system = AuthContext::system();
    let home = common::create_tenant(&guard, "Home").await?;
    let paused = common::create_tenant(&guard, "Paused").await?;
    let root = common::create_user(&guard, home.id, Role::SuperAdmin).await?;
    let subject = AccessSubject::from(&root);

    guard.tenants().set_status(&system, paused.id, TenantStatus::Inactive).await?;
    assert!(!guard.resolve_accessible_tenants(&subject).await?.contains(&paused.id));

    guard.tenants().set_status(&system, paused.id, TenantStatus::Active).await?;
    assert!(guard.resolve_accessible_tenants(&subject).await?.contains(&paused.id));
    let has_grant: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM tenant_access_grants WHERE user_id = $1 AND tenant_id = $2)",
    )
    .bind(root.id)
    .bind(paused.id)
    .fetch_one(&db.pool)
    .await?;
    assert!(has_grant);
    Ok(())
}

#[tokio::test]
async fn only_super_admins_change_roles() -> Result<()> {
    let Some(db) = common::test_db().await? else { return Ok(()) };
    let guard = db.guard();
    let home = common::create_tenant(&guard, "Home").await?;
    let admin = common::create_user(&guard, home.id, Role::Admin).await?;
    let user = common::create_user(&guard, home.id, Role::User).await?;

    let result = guard.users().change_role(&AuthContext::for_user(&admin), user.id, Role::Admin).await;
    assert!(matches!(result, Err(GuardError::Forbidden(_))), "got {:?}", result);
    Ok(())
}
