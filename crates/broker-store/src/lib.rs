pub mod cloud_kv_strategy;
pub mod criteria;
pub mod error;
pub mod event_publisher;
pub mod file_strategy;
pub mod memory_strategy;
pub mod postgres_strategy;
pub mod registry;
pub mod repository;
mod sigv4;
pub mod strategy;
pub mod unit_of_work;

pub use cloud_kv_strategy::CloudKvStorageStrategy;
pub use criteria::Criteria;
pub use error::StoreError;
pub use event_publisher::{AsyncSink, EventSink, LoggingSink, SyncSink};
pub use file_strategy::FileStorageStrategy;
pub use memory_strategy::InMemoryStorageStrategy;
pub use postgres_strategy::PostgresStorageStrategy;
pub use registry::StorageRegistry;
pub use repository::Repository;
pub use strategy::StorageStrategy;
pub use unit_of_work::UnitOfWork;
