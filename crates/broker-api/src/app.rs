use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::require_bearer_token;
use crate::facade::Broker;
use crate::handlers;
use crate::state::AppState;

/// Builds the axum server-mode router exposing the five scheduler-facing
/// boundary operations (§4.7, §6), bearer-token gated.
pub fn build_app(broker: Arc<Broker>, auth_token: String) -> Router {
    let state = AppState { broker, auth_token };

    Router::new()
        .route("/health", get(handlers::health))
        .route("/templates", get(handlers::get_available_templates))
        .route("/machines", post(handlers::request_machines))
        .route("/machines/return", post(handlers::request_return_machines))
        .route("/requests/status", post(handlers::get_request_status))
        .route("/requests/returns", get(handlers::get_return_requests))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer_token))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use broker_config::{
        AmiResolutionConfig, BrokerConfig, DirectoriesConfig, EventPublisherMode, EventsConfig,
        NamingConfig, ProviderConfig, RequestConfig, RetryConfig, StorageConfig, TemplateConfig,
    };
    use broker_domain::{Machine, ProviderStrategy, Request as DomainRequest, Template};
    use broker_engine::{LifecycleEngine, MachineReconciler, TemplateStore, MACHINES_ENTITY, REQUESTS_ENTITY};
    use broker_provider::HandlerRegistry;
    use broker_store::{InMemoryStorageStrategy, LoggingSink, Repository, StorageRegistry};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tower::util::ServiceExt;

    const TEST_TOKEN: &str = "test-token";

    fn test_config() -> BrokerConfig {
        BrokerConfig {
            provider: ProviderConfig {
                region: None,
                access_key_id: None,
                secret_access_key: None,
                profile: None,
                retry: RetryConfig { max_attempts: 3, base_delay_ms: 1000, jitter: true },
            },
            storage: StorageConfig { strategy: "memory".into(), params: HashMap::new() },
            template: TemplateConfig {
                defaults: HashMap::new(),
                ami_resolution: AmiResolutionConfig { use_ssm: false, ssm_prefix: None },
            },
            events: EventsConfig { mode: EventPublisherMode::Logging },
            request: RequestConfig { default_timeout_secs: 3600, max_timeout_secs: 86_400, cleanup_age_secs: 86_400 },
            naming: NamingConfig {
                template_id_pattern: "^[A-Za-z0-9_-]+$".into(),
                request_id_acquire_prefix: "req".into(),
                request_id_return_prefix: "ret".into(),
                machine_id_pattern: "^[ij]-[a-f0-9]+$".into(),
            },
            directories: DirectoriesConfig { work: PathBuf::from("/tmp"), conf: PathBuf::from("/tmp"), log: PathBuf::from("/tmp") },
        }
    }

    fn test_app() -> Router {
        let requests_strategy = Arc::new(InMemoryStorageStrategy::new());
        let machines_strategy = Arc::new(InMemoryStorageStrategy::new());
        let templates_strategy = Arc::new(InMemoryStorageStrategy::new());

        let mut registry = StorageRegistry::new();
        registry.register(REQUESTS_ENTITY, requests_strategy.clone());
        registry.register(MACHINES_ENTITY, machines_strategy.clone());
        let storage_registry = Arc::new(registry);

        let requests: Repository<DomainRequest> = Repository::new(requests_strategy);
        let machines: Repository<Machine> = Repository::new(machines_strategy);
        let templates_repo: Repository<Template> = Repository::new(templates_strategy);
        let template_store = Arc::new(TemplateStore::new(templates_repo, None));

        let handler_registry = Arc::new(HandlerRegistry::new());
        let engine = Arc::new(LifecycleEngine::new(
            storage_registry,
            Arc::new(LoggingSink),
            requests.clone(),
            machines.clone(),
            template_store.clone(),
            handler_registry,
            MachineReconciler::new(None),
        ));

        let broker = Arc::new(Broker::new(
            engine,
            template_store,
            machines,
            requests,
            test_config(),
            HashMap::new(),
        ));

        build_app(broker, TEST_TOKEN.to_string())
    }

    fn authed(req: axum::http::request::Builder) -> axum::http::request::Builder {
        req.header("Authorization", format!("Bearer {}", TEST_TOKEN))
    }

    #[tokio::test]
    async fn unauthenticated_request_returns_401() {
        let app = test_app();
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_token_returns_401() {
        let app = test_app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("Authorization", "Bearer wrong-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_returns_200() {
        let app = test_app();
        let resp = app
            .oneshot(authed(Request::builder().uri("/health")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn templates_empty_list_returns_200() {
        let app = test_app();
        let resp = app
            .oneshot(
                authed(Request::builder().method("GET").uri("/templates").header("content-type", "application/json"))
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn request_machines_zero_count_is_validation_error() {
        let app = test_app();
        let body = serde_json::json!({ "template": { "templateId": "t1", "machineCount": 0 } });
        let resp = app
            .oneshot(
                authed(Request::builder().method("POST").uri("/machines").header("content-type", "application/json"))
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn request_return_machines_empty_list_succeeds_with_null_request_id() {
        let app = test_app();
        let body = serde_json::json!({ "machines": [] });
        let resp = app
            .oneshot(
                authed(Request::builder().method("POST").uri("/machines/return").header("content-type", "application/json"))
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
