use std::collections::HashMap;
use std::sync::Arc;

use broker_domain::Event;
use serde_json::Value;
use tracing::warn;

use crate::error::StoreError;
use crate::event_publisher::EventSink;
use crate::registry::StorageRegistry;

/// Accumulates mutations for one logical operation (an acquire, a status
/// reconciliation pass) and flushes them atomically at `commit`.
///
/// Aggregates mutate by value: callers mutate in-memory aggregates which
/// return the pending `Event`, register the resulting blob and event here,
/// and only on `commit` does anything
/// reach storage. Events are dispatched strictly after the storage write
/// succeeds; a failing event sink never rolls back a committed write — it
/// is logged and the commit still reports success, since the canonical
/// state already landed in storage.
pub struct UnitOfWork {
    registry: Arc<StorageRegistry>,
    sink: Arc<dyn EventSink>,
    saves: HashMap<String, Vec<(String, Value)>>,
    deletes: HashMap<String, Vec<String>>,
    events: Vec<Event>,
}

impl UnitOfWork {
    pub fn new(registry: Arc<StorageRegistry>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            registry,
            sink,
            saves: HashMap::new(),
            deletes: HashMap::new(),
            events: Vec::new(),
        }
    }

    pub fn register_save(&mut self, entity_type: impl Into<String>, id: impl Into<String>, blob: Value) {
        self.saves
            .entry(entity_type.into())
            .or_default()
            .push((id.into(), blob));
    }

    pub fn register_delete(&mut self, entity_type: impl Into<String>, id: impl Into<String>) {
        self.deletes
            .entry(entity_type.into())
            .or_default()
            .push(id.into());
    }

    pub fn register_event(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn pending_event_count(&self) -> usize {
        self.events.len()
    }

    /// Discards every pending mutation and event without touching storage.
    pub fn rollback(&mut self) {
        self.saves.clear();
        self.deletes.clear();
        self.events.clear();
    }

    pub async fn commit(&mut self) -> Result<(), StoreError> {
        let saves = std::mem::take(&mut self.saves);
        let deletes = std::mem::take(&mut self.deletes);
        let events = std::mem::take(&mut self.events);

        let mut committed_types = Vec::new();
        for (entity_type, items) in &saves {
            let strategy = self.registry.resolve(entity_type)?;
            strategy.begin_transaction().await?;
            if let Err(e) = strategy.save_batch(items.clone()).await {
                strategy.rollback_transaction().await.ok();
                return Err(e);
            }
            strategy.commit_transaction().await?;
            committed_types.push(entity_type.clone());
        }

        for (entity_type, ids) in &deletes {
            let strategy = self.registry.resolve(entity_type)?;
            strategy.delete_batch(ids.clone()).await?;
        }

        for event in events {
            self.sink.publish(event).await;
        }

        Ok(())
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if !self.events.is_empty() || !self.saves.is_empty() {
            warn!("unit of work dropped with uncommitted mutations, discarding");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_publisher::LoggingSink;
    use crate::memory_strategy::InMemoryStorageStrategy;
    use broker_domain::{AggregateType, EventPayload};
    use serde_json::json;

    fn registry() -> Arc<StorageRegistry> {
        let mut r = StorageRegistry::new();
        r.register("requests", Arc::new(InMemoryStorageStrategy::new()));
        Arc::new(r)
    }

    #[tokio::test]
    async fn commit_persists_registered_saves() {
        let registry = registry();
        let mut uow = UnitOfWork::new(registry.clone(), Arc::new(LoggingSink));
        uow.register_save("requests", "req-1", json!({"status": "Pending"}));
        uow.commit().await.unwrap();

        let strategy = registry.resolve("requests").unwrap();
        assert_eq!(
            strategy.find_by_id("req-1").await.unwrap(),
            Some(json!({"status": "Pending"}))
        );
    }

    #[tokio::test]
    async fn rollback_discards_pending_mutations() {
        let registry = registry();
        let mut uow = UnitOfWork::new(registry.clone(), Arc::new(LoggingSink));
        uow.register_save("requests", "req-1", json!({"status": "Pending"}));
        uow.rollback();
        uow.commit().await.unwrap();

        let strategy = registry.resolve("requests").unwrap();
        assert!(strategy.find_by_id("req-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn events_dispatch_after_successful_commit() {
        let registry = registry();
        let mut uow = UnitOfWork::new(registry, Arc::new(LoggingSink));
        uow.register_event(Event::new(
            AggregateType::Request,
            "req-1",
            1,
            EventPayload::RequestStatusChanged {
                old_status: "Pending".to_string(),
                new_status: "Creating".to_string(),
                message: None,
                machine_count: 0,
            },
        ));
        assert_eq!(uow.pending_event_count(), 1);
        uow.commit().await.unwrap();
        assert_eq!(uow.pending_event_count(), 0);
    }
}
