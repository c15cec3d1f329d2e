use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub jitter: bool,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub profile: Option<String>,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub strategy: String,
    pub params: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct AmiResolutionConfig {
    pub use_ssm: bool,
    pub ssm_prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TemplateConfig {
    pub defaults: HashMap<String, serde_json::Value>,
    pub ami_resolution: AmiResolutionConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPublisherMode {
    Logging,
    Sync,
    Async,
}

#[derive(Debug, Clone)]
pub struct EventsConfig {
    pub mode: EventPublisherMode,
}

#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub default_timeout_secs: u32,
    pub max_timeout_secs: u32,
    pub cleanup_age_secs: u64,
}

#[derive(Debug, Clone)]
pub struct NamingConfig {
    pub template_id_pattern: String,
    pub request_id_acquire_prefix: String,
    pub request_id_return_prefix: String,
    pub machine_id_pattern: String,
}

#[derive(Debug, Clone)]
pub struct DirectoriesConfig {
    pub work: PathBuf,
    pub conf: PathBuf,
    pub log: PathBuf,
}

/// The broker's fully-resolved configuration, threaded explicitly through
/// constructors rather than held as a global singleton.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub provider: ProviderConfig,
    pub storage: StorageConfig,
    pub template: TemplateConfig,
    pub events: EventsConfig,
    pub request: RequestConfig,
    pub naming: NamingConfig,
    pub directories: DirectoriesConfig,
}
