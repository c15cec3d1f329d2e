use serde::Deserialize;
use std::collections::HashMap;

/// Raw YAML representation of the broker's configuration file.
#[derive(Debug, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub provider: RawProvider,
    #[serde(default)]
    pub storage: RawStorage,
    #[serde(default)]
    pub template: RawTemplate,
    #[serde(default)]
    pub events: RawEvents,
    #[serde(default)]
    pub request: RawRequest,
    #[serde(default)]
    pub naming: RawNaming,
    #[serde(default)]
    pub directories: RawDirectories,
}

#[derive(Debug, Deserialize, Default)]
pub struct RawProvider {
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub profile: Option<String>,
    #[serde(default)]
    pub retry: RawRetry,
}

#[derive(Debug, Deserialize)]
pub struct RawRetry {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RawRetry {
    fn default() -> Self {
        RawRetry {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            jitter: true,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Default)]
pub struct RawStorage {
    /// Storage-type tag resolved against the `StorageRegistry` (e.g. "file",
    /// "postgres", "dynamodb").
    #[serde(default = "default_storage_strategy")]
    pub strategy: String,
    /// Opaque per-strategy parameters, interpreted by `broker-store`.
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

fn default_storage_strategy() -> String {
    "file".to_string()
}

#[derive(Debug, Deserialize, Default)]
pub struct RawTemplate {
    #[serde(default)]
    pub defaults: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub ami_resolution: RawAmiResolution,
}

#[derive(Debug, Deserialize, Default)]
pub struct RawAmiResolution {
    #[serde(default)]
    pub use_ssm: bool,
    pub ssm_prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawEvents {
    /// One of "logging", "sync", "async".
    #[serde(default = "default_events_mode")]
    pub mode: String,
}

impl Default for RawEvents {
    fn default() -> Self {
        RawEvents {
            mode: default_events_mode(),
        }
    }
}

fn default_events_mode() -> String {
    "logging".to_string()
}

#[derive(Debug, Deserialize)]
pub struct RawRequest {
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u32,
    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: u32,
    #[serde(default = "default_cleanup_age_secs")]
    pub cleanup_age_secs: u64,
}

impl Default for RawRequest {
    fn default() -> Self {
        RawRequest {
            default_timeout_secs: default_timeout_secs(),
            max_timeout_secs: default_max_timeout_secs(),
            cleanup_age_secs: default_cleanup_age_secs(),
        }
    }
}

fn default_timeout_secs() -> u32 {
    3600
}
fn default_max_timeout_secs() -> u32 {
    86_400
}
fn default_cleanup_age_secs() -> u64 {
    7 * 24 * 3600
}

#[derive(Debug, Deserialize)]
pub struct RawNaming {
    #[serde(default = "default_template_id_pattern")]
    pub template_id_pattern: String,
    #[serde(default = "default_acquire_prefix")]
    pub request_id_acquire_prefix: String,
    #[serde(default = "default_return_prefix")]
    pub request_id_return_prefix: String,
    #[serde(default = "default_machine_id_pattern")]
    pub machine_id_pattern: String,
}

impl Default for RawNaming {
    fn default() -> Self {
        RawNaming {
            template_id_pattern: default_template_id_pattern(),
            request_id_acquire_prefix: default_acquire_prefix(),
            request_id_return_prefix: default_return_prefix(),
            machine_id_pattern: default_machine_id_pattern(),
        }
    }
}

fn default_template_id_pattern() -> String {
    r"^[A-Za-z0-9_-]+$".to_string()
}
fn default_acquire_prefix() -> String {
    "req".to_string()
}
fn default_return_prefix() -> String {
    "ret".to_string()
}
fn default_machine_id_pattern() -> String {
    r"^[ij]-[a-f0-9]+$".to_string()
}

#[derive(Debug, Deserialize, Default)]
pub struct RawDirectories {
    pub work: Option<String>,
    pub conf: Option<String>,
    pub log: Option<String>,
}
