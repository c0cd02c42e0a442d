mod common;

use anyhow::Result;

use nexio_guard::database::{DatabaseManager, MigrationRunner};

#[tokio::test]
async fn migrations_are_idempotent() -> Result<()> {
    let Some(db) = common::test_db().await? else { return Ok(()) };
    let runner = MigrationRunner::new(db.pool.clone());

    let applied = runner.run().await?;
    assert!(applied.is_empty(), "second run applied {:?}", applied);

    let status = runner.status().await?;
    assert!(!status.is_empty());
    assert!(status.iter().all(|m| m.applied_at.is_some()));
    assert!(status.windows(2).all(|w| w[0].version < w[1].version));
    Ok(())
}

#[tokio::test]
async fn manager_connects_from_config() -> Result<()> {
    let Some(db) = common::test_db().await? else { return Ok(()) };

    let manager = DatabaseManager::connect(&db.config.database).await?;
    manager.health_check().await?;
    manager.close().await;
    Ok(())
}
