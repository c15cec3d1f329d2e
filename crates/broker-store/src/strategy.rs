use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::criteria::Criteria;
use crate::error::StoreError;

/// Backend-agnostic persistence for one entity collection (§4.1).
///
/// A single `StorageStrategy` instance is scoped to one entity type —
/// templates, requests, or machines each get their own instance, addressed
/// by a stable string id and storing an opaque JSON blob. The registry
/// (`StorageRegistry`) is what lets the broker swap backends per entity
/// type or wholesale via configuration.
#[async_trait]
pub trait StorageStrategy: Send + Sync {
    async fn save(&self, id: &str, blob: Value) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Value>, StoreError>;

    async fn find_all(&self) -> Result<HashMap<String, Value>, StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.find_by_id(id).await?.is_some())
    }

    async fn find_by_criteria(&self, criteria: &Criteria) -> Result<Vec<Value>, StoreError> {
        let all = self.find_all().await?;
        Ok(all
            .into_values()
            .filter(|record| criteria.matches(record))
            .collect())
    }

    async fn save_batch(&self, items: Vec<(String, Value)>) -> Result<(), StoreError> {
        for (id, blob) in items {
            self.save(&id, blob).await?;
        }
        Ok(())
    }

    async fn delete_batch(&self, ids: Vec<String>) -> Result<(), StoreError> {
        for id in ids {
            self.delete(&id).await?;
        }
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
