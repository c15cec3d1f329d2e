use std::marker::PhantomData;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};

use crate::criteria::Criteria;
use crate::error::StoreError;
use crate::strategy::StorageStrategy;

/// Typed CRUD over one aggregate type, backed by a `StorageStrategy`.
///
/// Keeps the JSON-blob plumbing out of the engine layer: callers work with
/// `Template`/`Request`/`Machine` values directly, and (de)serialization
/// happens once, here.
pub struct Repository<T> {
    strategy: Arc<dyn StorageStrategy>,
    _marker: PhantomData<T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            strategy: self.strategy.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Repository<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(strategy: Arc<dyn StorageStrategy>) -> Self {
        Self {
            strategy,
            _marker: PhantomData,
        }
    }

    pub async fn save(&self, id: &str, value: &T) -> Result<(), StoreError> {
        let blob = serde_json::to_value(value)?;
        self.strategy.save(id, blob).await
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<T>, StoreError> {
        match self.strategy.find_by_id(id).await? {
            Some(blob) => Ok(Some(serde_json::from_value(blob)?)),
            None => Ok(None),
        }
    }

    pub async fn find_all(&self) -> Result<Vec<T>, StoreError> {
        let all = self.strategy.find_all().await?;
        all.into_values()
            .map(|blob| serde_json::from_value(blob).map_err(StoreError::from))
            .collect()
    }

    pub async fn find_by_criteria(&self, criteria: &Criteria) -> Result<Vec<T>, StoreError> {
        let matches = self.strategy.find_by_criteria(criteria).await?;
        matches
            .into_iter()
            .map(|blob| serde_json::from_value(blob).map_err(StoreError::from))
            .collect()
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.strategy.delete(id).await
    }

    pub async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        self.strategy.exists(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_strategy::InMemoryStorageStrategy;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        id: String,
        status: String,
    }

    #[tokio::test]
    async fn save_then_find_by_id_round_trips_typed_value() {
        let repo: Repository<Sample> = Repository::new(Arc::new(InMemoryStorageStrategy::new()));
        let value = Sample {
            id: "req-1".to_string(),
            status: "Pending".to_string(),
        };
        repo.save("req-1", &value).await.unwrap();
        assert_eq!(repo.find_by_id("req-1").await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn find_by_criteria_filters_typed_values() {
        let repo: Repository<Sample> = Repository::new(Arc::new(InMemoryStorageStrategy::new()));
        repo.save(
            "req-1",
            &Sample {
                id: "req-1".to_string(),
                status: "Pending".to_string(),
            },
        )
        .await
        .unwrap();
        repo.save(
            "req-2",
            &Sample {
                id: "req-2".to_string(),
                status: "Running".to_string(),
            },
        )
        .await
        .unwrap();

        let running = repo
            .find_by_criteria(&Criteria::eq("status", serde_json::json!("Running")))
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, "req-2");
    }
}
