use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use broker_config::{BrokerConfig, EventPublisherMode};
use broker_domain::{Machine, ProviderStrategy, Request as DomainRequest, Template};
use broker_engine::{LifecycleEngine, MachineReconciler, TemplateStore, MACHINES_ENTITY, REQUESTS_ENTITY};
use broker_provider::{
    AutoScalingGroupHandler, AwsCredentials, DirectLaunchHandler, HandlerRegistry,
    InstantFleetHandler, ManagedFleetHandler, RetryPolicy, SpotFleetHandler,
};
use broker_store::{
    AsyncSink, EventSink, FileStorageStrategy, InMemoryStorageStrategy, LoggingSink,
    Repository, StorageRegistry, StorageStrategy, SyncSink,
};

/// Everything needed to serve the five boundary operations: the lifecycle
/// engine plus the raw repositories the facade queries directly (status
/// lookups, grace-period resolution) without going through the engine.
pub struct Runtime {
    pub engine: Arc<LifecycleEngine>,
    pub templates: Arc<TemplateStore>,
    pub machines: Repository<Machine>,
    pub requests: Repository<DomainRequest>,
    pub config: BrokerConfig,
}

/// Assembles the production stack from a loaded [`BrokerConfig`]: storage
/// strategies per entity, the real AWS-backed provider handlers (never
/// `FakeProviderHandler`, which is test-only), and the lifecycle engine that
/// ties them together.
pub async fn build_runtime(config: BrokerConfig) -> Result<Runtime> {
    let requests_strategy = build_strategy(&config, REQUESTS_ENTITY)?;
    let machines_strategy = build_strategy(&config, MACHINES_ENTITY)?;
    let templates_strategy = build_strategy(&config, "templates")?;

    let mut registry = StorageRegistry::new();
    registry.register(REQUESTS_ENTITY, requests_strategy.clone());
    registry.register(MACHINES_ENTITY, machines_strategy.clone());
    let storage_registry = Arc::new(registry);

    let requests: Repository<DomainRequest> = Repository::new(requests_strategy);
    let machines: Repository<Machine> = Repository::new(machines_strategy);
    let templates_repo: Repository<Template> = Repository::new(templates_strategy);
    let templates = Arc::new(TemplateStore::new(templates_repo, None));
    templates.reload().await.context("loading templates")?;

    let event_sink = build_event_sink(&config);
    let handlers = Arc::new(build_handler_registry(&config)?);

    let engine = Arc::new(LifecycleEngine::new(
        storage_registry,
        event_sink,
        requests.clone(),
        machines.clone(),
        templates.clone(),
        handlers,
        MachineReconciler::new(None),
    ));

    Ok(Runtime { engine, templates, machines, requests, config })
}

fn build_strategy(config: &BrokerConfig, entity: &str) -> Result<Arc<dyn StorageStrategy>> {
    match config.storage.strategy.as_str() {
        "memory" => Ok(Arc::new(InMemoryStorageStrategy::new())),
        "file" => {
            let path = config.directories.work.join(format!("{entity}.json"));
            Ok(Arc::new(FileStorageStrategy::new(path)))
        }
        other => anyhow::bail!(
            "unsupported storage strategy '{other}'; broker-cli supports 'memory' and 'file'"
        ),
    }
}

fn build_event_sink(config: &BrokerConfig) -> Arc<dyn EventSink> {
    match config.events.mode {
        EventPublisherMode::Logging => Arc::new(LoggingSink),
        EventPublisherMode::Sync => Arc::new(SyncSink::new(vec![Arc::new(LoggingSink)])),
        EventPublisherMode::Async => {
            let (sink, mut rx) = AsyncSink::channel();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    LoggingSink.publish(event).await;
                }
            });
            Arc::new(sink)
        }
    }
}

fn build_handler_registry(config: &BrokerConfig) -> Result<HandlerRegistry> {
    let region = config
        .provider
        .region
        .clone()
        .context("provider.region must be set to construct AWS provider handlers")?;
    let credentials = resolve_credentials(config)?;
    let retry = RetryPolicy {
        max_attempts: config.provider.retry.max_attempts,
        base_delay_ms: config.provider.retry.base_delay_ms,
        jitter: config.provider.retry.jitter,
    };

    let mut registry = HandlerRegistry::new();
    registry.register(
        ProviderStrategy::DirectLaunch,
        Arc::new(DirectLaunchHandler::new(region.clone(), credentials.clone(), retry.clone())),
    );
    registry.register(
        ProviderStrategy::InstantFleet,
        Arc::new(InstantFleetHandler::new(region.clone(), credentials.clone(), retry.clone())),
    );
    registry.register(
        ProviderStrategy::ManagedFleet,
        Arc::new(ManagedFleetHandler::new(region.clone(), credentials.clone(), retry.clone())),
    );
    registry.register(
        ProviderStrategy::AutoScalingGroup,
        Arc::new(AutoScalingGroupHandler::new(region.clone(), credentials.clone(), retry.clone())),
    );
    registry.register(
        ProviderStrategy::SpotFleet,
        Arc::new(SpotFleetHandler::new(region, credentials, retry)),
    );
    Ok(registry)
}

fn resolve_credentials(config: &BrokerConfig) -> Result<AwsCredentials> {
    if let (Some(access_key_id), Some(secret_access_key)) =
        (&config.provider.access_key_id, &config.provider.secret_access_key)
    {
        return Ok(AwsCredentials {
            access_key_id: access_key_id.clone(),
            secret_access_key: secret_access_key.clone(),
            session_token: None,
        });
    }
    AwsCredentials::from_env().context(
        "no AWS credentials: set provider.access_key_id/secret_access_key in the config \
         or AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY in the environment",
    )
}

/// Default path for the broker config file, mirroring the token-file
/// resolution convention: explicit flag wins, otherwise `~/.broker/config.yaml`.
pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".broker").join("config.yaml")
}

pub fn load_config(explicit: Option<PathBuf>) -> Result<BrokerConfig> {
    let path = explicit.unwrap_or_else(default_config_path);
    broker_config::load_config(&path)
        .with_context(|| format!("loading broker config from {}", path.display()))
}
