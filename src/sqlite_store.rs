//! SQLite-backed [`StateStore`] implementation.
//!
//! Every write is a single statement or a transaction, so an interrupted
//! write leaves the previously committed row in place.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use frigate_relay_core::models::{DedupEntry, DeliveryOutcome, ToggleState};
use frigate_relay_core::store::StateStore;

/// SQLite implementation of the [`StateStore`] trait.
///
/// Wraps a [`SqlitePool`] over the schema created by
/// [`apply_schema`](crate::migrate::apply_schema)
/// (toggle_state, dedup, checkpoints).
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn dedup_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dedup")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn load_toggle(&self) -> Result<Option<ToggleState>> {
        let row = sqlx::query("SELECT enabled, revision, updated_at FROM toggle_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| ToggleState {
            enabled: r.get::<i64, _>("enabled") != 0,
            revision: r.get::<i64, _>("revision").max(0) as u64,
            updated_at: r.get::<i64, _>("updated_at"),
        }))
    }

    async fn save_toggle(&self, state: &ToggleState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO toggle_state (id, enabled, revision, updated_at) VALUES (1, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                enabled = excluded.enabled,
                revision = excluded.revision,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(state.enabled as i64)
        .bind(state.revision as i64)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_dedup(&self) -> Result<Vec<DedupEntry>> {
        let rows = sqlx::query(
            "SELECT event_id, outcome, resolved_at FROM dedup ORDER BY resolved_at ASC, rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let outcome: String = row.get("outcome");
            let Some(outcome) = DeliveryOutcome::parse(&outcome) else {
                continue;
            };
            entries.push(DedupEntry {
                event_id: row.get("event_id"),
                outcome,
                resolved_at: row.get("resolved_at"),
            });
        }
        Ok(entries)
    }

    async fn record_outcome(&self, entry: &DedupEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO dedup (event_id, outcome, resolved_at) VALUES (?, ?, ?) ON CONFLICT(event_id) DO NOTHING",
        )
        .bind(&entry.event_id)
        .bind(entry.outcome.as_str())
        .bind(entry.resolved_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn prune_dedup(&self, capacity: usize, older_than: i64) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let aged = sqlx::query("DELETE FROM dedup WHERE resolved_at < ?")
            .bind(older_than)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let overflow = sqlx::query(
            r#"
            DELETE FROM dedup WHERE event_id NOT IN (
                SELECT event_id FROM dedup ORDER BY resolved_at DESC, rowid DESC LIMIT ?
            )
            "#,
        )
        .bind(capacity as i64)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(aged + overflow)
    }

    async fn load_cursor(&self, source: &str) -> Result<Option<f64>> {
        let result: Option<String> =
            sqlx::query_scalar("SELECT cursor FROM checkpoints WHERE source = ?")
                .bind(source)
                .fetch_optional(&self.pool)
                .await?;

        Ok(result.and_then(|s| s.parse::<f64>().ok()))
    }

    async fn save_cursor(&self, source: &str, cursor: f64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO checkpoints (source, cursor, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(source) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at
            "#,
        )
        .bind(source)
        .bind(cursor.to_string())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate::apply_schema;
    use tempfile::TempDir;

    async fn open(tmp: &TempDir) -> SqliteStore {
        let pool = db::connect_path(&tmp.path().join("state.sqlite"))
            .await
            .unwrap();
        apply_schema(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn entry(id: &str, outcome: DeliveryOutcome, at: i64) -> DedupEntry {
        DedupEntry {
            event_id: id.to_string(),
            outcome,
            resolved_at: at,
        }
    }

    #[tokio::test]
    async fn test_toggle_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let store = open(&tmp).await;
            assert!(store.load_toggle().await.unwrap().is_none());
            store
                .save_toggle(&ToggleState {
                    enabled: false,
                    revision: 1,
                    updated_at: 100,
                })
                .await
                .unwrap();
            store.pool().close().await;
        }
        let store = open(&tmp).await;
        let loaded = store.load_toggle().await.unwrap().unwrap();
        assert!(!loaded.enabled);
        assert_eq!(loaded.revision, 1);
    }

    #[tokio::test]
    async fn test_dedup_first_outcome_wins_and_prunes() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;

        store
            .record_outcome(&entry("a", DeliveryOutcome::Delivered, 10))
            .await
            .unwrap();
        store
            .record_outcome(&entry("a", DeliveryOutcome::Abandoned, 11))
            .await
            .unwrap();
        for (id, at) in [("b", 20), ("c", 30), ("d", 40)] {
            store
                .record_outcome(&entry(id, DeliveryOutcome::Delivered, at))
                .await
                .unwrap();
        }

        let all = store.load_dedup().await.unwrap();
        assert_eq!(all[0], entry("a", DeliveryOutcome::Delivered, 10));
        assert_eq!(store.dedup_count().await.unwrap(), 4);

        let removed = store.prune_dedup(2, 15).await.unwrap();
        assert_eq!(removed, 2);
        let ids: Vec<String> = store
            .load_dedup()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_id)
            .collect();
        assert_eq!(ids, vec!["c", "d"]);
    }

    #[tokio::test]
    async fn test_cursor_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        store.save_cursor("frigate:events", 1_700_000_000.25).await.unwrap();
        store.save_cursor("frigate:events", 1_700_000_100.5).await.unwrap();
        assert_eq!(
            store.load_cursor("frigate:events").await.unwrap(),
            Some(1_700_000_100.5)
        );
    }
}
