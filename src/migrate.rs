use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the schema in the configured database. Idempotent.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Single-row toggle table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS toggle_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            enabled INTEGER NOT NULL,
            revision INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Resolved event identifiers
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dedup (
            event_id TEXT PRIMARY KEY,
            outcome TEXT NOT NULL CHECK (outcome IN ('delivered', 'abandoned')),
            resolved_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Poll cursors
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            source TEXT PRIMARY KEY,
            cursor TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_dedup_resolved_at ON dedup(resolved_at)")
        .execute(pool)
        .await?;

    Ok(())
}
