pub mod config;
pub mod error;
mod loader;
mod raw;

pub use config::{
    AmiResolutionConfig, BrokerConfig, DirectoriesConfig, EventPublisherMode, EventsConfig,
    NamingConfig, ProviderConfig, RequestConfig, RetryConfig, StorageConfig, TemplateConfig,
};
pub use error::ConfigError;
pub use loader::load_config;
