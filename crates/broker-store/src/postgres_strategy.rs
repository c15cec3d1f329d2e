use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::strategy::StorageStrategy;

const MIGRATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS broker_entities (
    entity_type TEXT NOT NULL,
    id          TEXT NOT NULL,
    blob        JSONB NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (entity_type, id)
);
CREATE INDEX IF NOT EXISTS broker_entities_type_idx ON broker_entities (entity_type);
"#;

/// Relational storage strategy, one instance per entity type, all sharing a
/// single `broker_entities` table keyed by `(entity_type, id)`: a JSONB
/// blob column, migration run once at connect time, `ON CONFLICT (...) DO
/// UPDATE` upserts.
pub struct PostgresStorageStrategy {
    pool: PgPool,
    entity_type: String,
    tx: Mutex<Option<Transaction<'static, Postgres>>>,
}

impl PostgresStorageStrategy {
    pub async fn connect(url: &str, entity_type: impl Into<String>) -> Result<Self, StoreError> {
        let pool = PgPool::connect(url).await?;
        let strategy = Self {
            pool,
            entity_type: entity_type.into(),
            tx: Mutex::new(None),
        };
        strategy.migrate().await?;
        Ok(strategy)
    }

    pub fn from_pool(pool: PgPool, entity_type: impl Into<String>) -> Self {
        Self {
            pool,
            entity_type: entity_type.into(),
            tx: Mutex::new(None),
        }
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(MIGRATIONS).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageStrategy for PostgresStorageStrategy {
    async fn save(&self, id: &str, blob: Value) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO broker_entities (entity_type, id, blob, updated_at) \
             VALUES ($1, $2, $3, now()) \
             ON CONFLICT (entity_type, id) DO UPDATE SET blob = $3, updated_at = now()",
        )
        .bind(&self.entity_type)
        .bind(id)
        .bind(&blob)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query("SELECT blob FROM broker_entities WHERE entity_type = $1 AND id = $2")
            .bind(&self.entity_type)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<Value, _>("blob")))
    }

    async fn find_all(&self) -> Result<HashMap<String, Value>, StoreError> {
        let rows = sqlx::query("SELECT id, blob FROM broker_entities WHERE entity_type = $1")
            .bind(&self.entity_type)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("id"), r.get::<Value, _>("blob")))
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM broker_entities WHERE entity_type = $1 AND id = $2")
            .bind(&self.entity_type)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_batch(&self, items: Vec<(String, Value)>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for (id, blob) in items {
            sqlx::query(
                "INSERT INTO broker_entities (entity_type, id, blob, updated_at) \
                 VALUES ($1, $2, $3, now()) \
                 ON CONFLICT (entity_type, id) DO UPDATE SET blob = $3, updated_at = now()",
            )
            .bind(&self.entity_type)
            .bind(&id)
            .bind(&blob)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_batch(&self, ids: Vec<String>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM broker_entities WHERE entity_type = $1 AND id = $2")
                .bind(&self.entity_type)
                .bind(&id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<(), StoreError> {
        let mut slot = self.tx.lock().await;
        if slot.is_some() {
            return Err(StoreError::TransactionAlreadyOpen);
        }
        *slot = Some(self.pool.begin().await?);
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<(), StoreError> {
        let mut slot = self.tx.lock().await;
        match slot.take() {
            Some(tx) => {
                tx.commit().await?;
                Ok(())
            }
            None => Err(StoreError::NoTransactionOpen),
        }
    }

    async fn rollback_transaction(&self) -> Result<(), StoreError> {
        let mut slot = self.tx.lock().await;
        match slot.take() {
            Some(tx) => {
                tx.rollback().await?;
                Ok(())
            }
            None => Err(StoreError::NoTransactionOpen),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_url() -> Option<String> {
        std::env::var("TEST_POSTGRES_URL").ok()
    }

    #[tokio::test]
    #[ignore = "requires TEST_POSTGRES_URL"]
    async fn save_then_find_by_id_round_trips() {
        let Some(url) = test_url() else { return };
        let strategy = PostgresStorageStrategy::connect(&url, "requests_test")
            .await
            .unwrap();
        strategy
            .save("req-1", serde_json::json!({"status": "Pending"}))
            .await
            .unwrap();
        let found = strategy.find_by_id("req-1").await.unwrap();
        assert_eq!(found, Some(serde_json::json!({"status": "Pending"})));
    }

    #[tokio::test]
    #[ignore = "requires TEST_POSTGRES_URL"]
    async fn rollback_discards_batch_writes() {
        let Some(url) = test_url() else { return };
        let strategy = PostgresStorageStrategy::connect(&url, "requests_test_rollback")
            .await
            .unwrap();
        strategy.begin_transaction().await.unwrap();
        strategy.rollback_transaction().await.unwrap();
        assert!(strategy.find_by_id("req-never-committed").await.unwrap().is_none());
    }
}
