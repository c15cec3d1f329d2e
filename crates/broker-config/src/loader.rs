use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::{
    AmiResolutionConfig, BrokerConfig, DirectoriesConfig, EventPublisherMode, EventsConfig,
    NamingConfig, ProviderConfig, RequestConfig, RetryConfig, StorageConfig, TemplateConfig,
};
use crate::error::ConfigError;
use crate::raw::RawConfig;

/// Loads the broker configuration from a YAML file at `path`.
pub fn load_config(path: &Path) -> Result<BrokerConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let raw: RawConfig = serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
        path: path.display().to_string(),
        source: e,
    })?;
    debug!("loaded broker config from {}", path.display());
    convert(raw, path)
}

fn convert(raw: RawConfig, path: &Path) -> Result<BrokerConfig, ConfigError> {
    let provider = ProviderConfig {
        region: raw.provider.region,
        access_key_id: raw.provider.access_key_id,
        secret_access_key: raw.provider.secret_access_key,
        profile: raw.provider.profile,
        retry: RetryConfig {
            max_attempts: raw.provider.retry.max_attempts,
            base_delay_ms: raw.provider.retry.base_delay_ms,
            jitter: raw.provider.retry.jitter,
        },
    };

    let storage = StorageConfig {
        strategy: raw.storage.strategy,
        params: raw.storage.params,
    };

    let template = TemplateConfig {
        defaults: raw.template.defaults,
        ami_resolution: AmiResolutionConfig {
            use_ssm: raw.template.ami_resolution.use_ssm,
            ssm_prefix: raw.template.ami_resolution.ssm_prefix,
        },
    };

    let events = EventsConfig {
        mode: parse_events_mode(&raw.events.mode, path)?,
    };

    let request = RequestConfig {
        default_timeout_secs: raw.request.default_timeout_secs,
        max_timeout_secs: raw.request.max_timeout_secs,
        cleanup_age_secs: raw.request.cleanup_age_secs,
    };

    validate_regex(&raw.naming.template_id_pattern, path)?;
    validate_regex(&raw.naming.machine_id_pattern, path)?;
    let naming = NamingConfig {
        template_id_pattern: raw.naming.template_id_pattern,
        request_id_acquire_prefix: raw.naming.request_id_acquire_prefix,
        request_id_return_prefix: raw.naming.request_id_return_prefix,
        machine_id_pattern: raw.naming.machine_id_pattern,
    };

    let directories = DirectoriesConfig {
        work: resolve_dir(raw.directories.work, "BROKER_WORK_DIR", "./work"),
        conf: resolve_dir(raw.directories.conf, "BROKER_CONF_DIR", "./conf"),
        log: resolve_dir(raw.directories.log, "BROKER_LOG_DIR", "./log"),
    };

    Ok(BrokerConfig {
        provider,
        storage,
        template,
        events,
        request,
        naming,
        directories,
    })
}

fn parse_events_mode(s: &str, path: &Path) -> Result<EventPublisherMode, ConfigError> {
    match s {
        "logging" => Ok(EventPublisherMode::Logging),
        "sync" => Ok(EventPublisherMode::Sync),
        "async" => Ok(EventPublisherMode::Async),
        other => Err(ConfigError::Conversion {
            path: path.display().to_string(),
            message: format!("unknown events mode '{other}'"),
        }),
    }
}

fn validate_regex(pattern: &str, path: &Path) -> Result<(), ConfigError> {
    regex::Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| ConfigError::Conversion {
            path: path.display().to_string(),
            message: format!("invalid naming regex '{pattern}': {e}"),
        })
}

/// Directory placeholder precedence chain: explicit config value → environment
/// variable → default (§6, "Environment interface").
fn resolve_dir(explicit: Option<String>, env_var: &str, default: &str) -> PathBuf {
    explicit
        .or_else(|| std::env::var(env_var).ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        let f = write_fixture("provider:\n  region: us-east-1\n");
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.provider.region.as_deref(), Some("us-east-1"));
        assert_eq!(cfg.storage.strategy, "file");
        assert_eq!(cfg.request.default_timeout_secs, 3600);
        assert_eq!(cfg.events.mode, EventPublisherMode::Logging);
    }

    #[test]
    fn rejects_unknown_events_mode() {
        let f = write_fixture("events:\n  mode: carrier-pigeon\n");
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn directory_precedence_prefers_explicit_over_env() {
        std::env::set_var("BROKER_WORK_DIR", "/from/env");
        let f = write_fixture("directories:\n  work: /from/config\n");
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.directories.work, PathBuf::from("/from/config"));
        std::env::remove_var("BROKER_WORK_DIR");
    }

    #[test]
    fn missing_file_returns_io_error() {
        let path = Path::new("/nonexistent/broker.yaml");
        assert!(load_config(path).is_err());
    }
}
