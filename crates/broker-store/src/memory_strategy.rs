use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::strategy::StorageStrategy;

/// Process-local storage strategy for tests and ephemeral runs: a single
/// `Arc<RwLock<..>>` guarding a plain `HashMap`, no persistence beyond the
/// process lifetime.
#[derive(Default)]
pub struct InMemoryStorageStrategy {
    inner: Arc<RwLock<HashMap<String, Value>>>,
}

impl InMemoryStorageStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageStrategy for InMemoryStorageStrategy {
    async fn save(&self, id: &str, blob: Value) -> Result<(), StoreError> {
        self.inner.write().await.insert(id.to_string(), blob);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.inner.read().await.get(id).cloned())
    }

    async fn find_all(&self) -> Result<HashMap<String, Value>, StoreError> {
        Ok(self.inner.read().await.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.inner.write().await.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn save_and_find_round_trip() {
        let s = InMemoryStorageStrategy::new();
        s.save("m-1", json!({"status": "Running"})).await.unwrap();
        assert_eq!(
            s.find_by_id("m-1").await.unwrap(),
            Some(json!({"status": "Running"}))
        );
    }

    #[tokio::test]
    async fn exists_reflects_presence() {
        let s = InMemoryStorageStrategy::new();
        assert!(!s.exists("m-1").await.unwrap());
        s.save("m-1", json!({})).await.unwrap();
        assert!(s.exists("m-1").await.unwrap());
    }
}
