use std::collections::HashMap;
use std::sync::Arc;

use crate::error::StoreError;
use crate::strategy::StorageStrategy;

/// Resolves a configured storage strategy by entity-type tag.
///
/// A plain map from string tag to boxed trait object, populated once at
/// startup from configuration and consulted on every repository operation.
#[derive(Default)]
pub struct StorageRegistry {
    strategies: HashMap<String, Arc<dyn StorageStrategy>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entity_type: impl Into<String>, strategy: Arc<dyn StorageStrategy>) {
        self.strategies.insert(entity_type.into(), strategy);
    }

    pub fn resolve(&self, entity_type: &str) -> Result<Arc<dyn StorageStrategy>, StoreError> {
        self.strategies
            .get(entity_type)
            .cloned()
            .ok_or_else(|| StoreError::UnsupportedStorage(entity_type.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_strategy::InMemoryStorageStrategy;

    #[test]
    fn resolve_returns_registered_strategy() {
        let mut registry = StorageRegistry::new();
        registry.register("requests", Arc::new(InMemoryStorageStrategy::new()));
        assert!(registry.resolve("requests").is_ok());
    }

    #[test]
    fn resolve_unregistered_type_is_an_error() {
        let registry = StorageRegistry::new();
        assert!(matches!(
            registry.resolve("machines"),
            Err(StoreError::UnsupportedStorage(_))
        ));
    }
}
