use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use broker_config::BrokerConfig;
use broker_domain::{Machine, MachineId, PriceTier, Request, RequestId, RequestStatus, TemplateId};
use broker_engine::{EngineError, LifecycleEngine, ReturnTarget, TemplateStore};
use broker_store::{Criteria, Repository};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::rate_limit::RateLimiter;

const RETURN_REQUESTS_CACHE_TTL: Duration = Duration::from_secs(60);
const DEFAULT_GRACE_PERIOD_SECS: i64 = 300;
const SPOT_GRACE_PERIOD_SECS: i64 = 120;
const STATUS_POLL_MAX_ATTEMPTS: u32 = 3;

/// The five scheduler-facing boundary operations (§4.7), sitting above the
/// lifecycle engine. Owns the ambient concerns the engine itself doesn't:
/// rate limiting, response-envelope shaping, and the 60s return-requests
/// cache.
pub struct Broker {
    engine: Arc<LifecycleEngine>,
    templates: Arc<TemplateStore>,
    machines: Repository<Machine>,
    requests: Repository<Request>,
    config: BrokerConfig,
    rate_limiters: HashMap<&'static str, Arc<RateLimiter>>,
    return_requests_cache: Mutex<HashMap<String, (Instant, Value)>>,
}

impl Broker {
    pub fn new(
        engine: Arc<LifecycleEngine>,
        templates: Arc<TemplateStore>,
        machines: Repository<Machine>,
        requests: Repository<Request>,
        config: BrokerConfig,
        rate_limiters: HashMap<&'static str, Arc<RateLimiter>>,
    ) -> Self {
        Self {
            engine,
            templates,
            machines,
            requests,
            config,
            rate_limiters,
            return_requests_cache: Mutex::new(HashMap::new()),
        }
    }

    fn check_rate_limit(&self, operation: &'static str) -> Result<(), ApiError> {
        match self.rate_limiters.get(operation) {
            Some(limiter) if !limiter.try_acquire() => Err(ApiError::rate_limit_exceeded()),
            _ => Ok(()),
        }
    }

    /// List templates (§4.7). `long` is accepted for interface parity but
    /// left unresolved here: cloud-side detail enrichment requires a live
    /// provider client this layer doesn't hold, so `long` currently has no
    /// observable effect (see DESIGN.md).
    pub async fn list_templates(&self, _long: bool) -> Result<Value, ApiError> {
        self.check_rate_limit("getAvailableTemplates")?;
        let templates = self.templates.list().await.map_err(ApiError::from)?;
        let rendered: Vec<Value> = templates
            .iter()
            .map(|t| serde_json::to_value(t).unwrap_or(Value::Null))
            .collect();
        Ok(json!({ "templates": rendered }))
    }

    /// Request machines (§4.7): `{template: {templateId, machineCount}}`.
    pub async fn request_machines(
        &self,
        template_id: &str,
        machine_count: u32,
        tags: HashMap<String, String>,
        metadata: Value,
    ) -> Result<Value, ApiError> {
        self.check_rate_limit("requestMachines")?;

        let template_id = TemplateId::new(template_id).map_err(EngineError::from)?;
        let timeout_secs = Some(self.config.request.default_timeout_secs);
        let request_id = self
            .engine
            .create_acquire(template_id.clone(), machine_count, timeout_secs, tags, metadata)
            .await?;

        Ok(json!({
            "requestId": request_id.to_string(),
            "message": format!("VM request against template '{template_id}' submitted successfully"),
        }))
    }

    /// Request return machines (§4.7). Empty machine list (and `all=false`)
    /// returns success with `requestId=null`, no mutation.
    pub async fn request_return_machines(&self, machine_ids: Vec<String>, all: bool) -> Result<Value, ApiError> {
        self.check_rate_limit("requestReturnMachines")?;

        let target = if all {
            ReturnTarget::All
        } else {
            let mut ids = Vec::with_capacity(machine_ids.len());
            for raw in machine_ids {
                ids.push(MachineId::new(&raw).map_err(EngineError::from)?);
            }
            ReturnTarget::Specific(ids)
        };

        let request_id = self.engine.create_return(target).await?;
        Ok(json!({
            "requestId": request_id.map(|id| id.to_string()),
        }))
    }

    /// Get request status (§4.7). Accepts explicit request ids or `all=true`
    /// for every still-active request. Partial failures collect into an
    /// `errors` array; the overall call still succeeds as long as at least
    /// one request was processed (or the set was simply empty).
    pub async fn get_request_status(&self, request_ids: Vec<String>, all: bool) -> Result<Value, ApiError> {
        self.check_rate_limit("getRequestStatus")?;

        let ids: Vec<RequestId> = if all {
            self.active_request_ids().await?
        } else {
            let mut out = Vec::with_capacity(request_ids.len());
            for raw in request_ids {
                out.push(RequestId::new(&raw).map_err(EngineError::from)?);
            }
            out
        };

        let mut requests = Vec::with_capacity(ids.len());
        let mut errors = Vec::new();

        for id in ids {
            match self.reconcile_with_retry(&id).await {
                Ok(request) => requests.push(request_report(&request)),
                Err(e) => {
                    let api_err: ApiError = e.into();
                    errors.push(json!({
                        "requestId": id.to_string(),
                        "error": api_err.error_type,
                        "message": api_err.message,
                    }));
                }
            }
        }

        Ok(json!({
            "requests": requests,
            "errors": errors,
        }))
    }

    async fn active_request_ids(&self) -> Result<Vec<RequestId>, ApiError> {
        let active_statuses = vec![
            json!(RequestStatus::Pending.to_string()),
            json!(RequestStatus::Creating.to_string()),
            json!(RequestStatus::Running.to_string()),
        ];
        let active = self
            .requests
            .find_by_criteria(&Criteria::in_set("status", active_statuses))
            .await
            .map_err(EngineError::from)?;
        Ok(active.into_iter().map(|r| r.request_id).collect())
    }

    /// Retries up to 3 times on a transient (storage) error; `RequestNotFound`
    /// and every other error is surfaced immediately (§4.7).
    async fn reconcile_with_retry(&self, id: &RequestId) -> Result<Request, EngineError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.engine.reconcile_status(id).await {
                Ok(request) => return Ok(request),
                Err(EngineError::Store(e)) if attempt < STATUS_POLL_MAX_ATTEMPTS => {
                    tracing::warn!(error = %e, request_id = %id, attempt, "transient status-poll error, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Get return requests (§4.7): every Return-type request, each carrying a
    /// grace period (300s default, 120s if any of its machines is spot),
    /// cached for 60s per identical query key.
    pub async fn get_return_requests(&self, long: bool) -> Result<Value, ApiError> {
        self.check_rate_limit("getReturnRequests")?;

        let cache_key = format!("long={long}");
        if let Some(cached) = self.cached_return_requests(&cache_key) {
            return Ok(cached);
        }

        let returns = self
            .requests
            .find_by_criteria(&Criteria::eq("request_type", json!("Return")))
            .await
            .map_err(EngineError::from)?;

        let mut rendered = Vec::with_capacity(returns.len());
        for request in &returns {
            let grace_period_secs = self.grace_period_for(request).await?;
            rendered.push(json!({
                "requestId": request.request_id.to_string(),
                "status": request.status.to_string(),
                "machineIds": request.returning_machine_ids.iter().map(|m| m.to_string()).collect::<Vec<_>>(),
                "gracePeriod": grace_period_secs,
            }));
        }

        let body = json!({ "requests": rendered });
        self.cache_return_requests(cache_key, body.clone());
        Ok(body)
    }

    async fn grace_period_for(&self, request: &Request) -> Result<i64, ApiError> {
        for machine_id in &request.returning_machine_ids {
            if let Some(machine) = self
                .machines
                .find_by_id(machine_id.as_str())
                .await
                .map_err(EngineError::from)?
            {
                if machine.price_tier == PriceTier::Spot {
                    return Ok(SPOT_GRACE_PERIOD_SECS);
                }
            }
        }
        Ok(DEFAULT_GRACE_PERIOD_SECS)
    }

    fn cached_return_requests(&self, key: &str) -> Option<Value> {
        let cache = self.return_requests_cache.lock().expect("cache mutex poisoned");
        cache.get(key).and_then(|(stamped_at, value)| {
            if stamped_at.elapsed() < RETURN_REQUESTS_CACHE_TTL {
                Some(value.clone())
            } else {
                None
            }
        })
    }

    fn cache_return_requests(&self, key: String, value: Value) {
        let mut cache = self.return_requests_cache.lock().expect("cache mutex poisoned");
        cache.insert(key, (Instant::now(), value));
    }
}

fn request_report(request: &Request) -> Value {
    let machines: Vec<Value> = request.machines.iter().map(machine_report).collect();
    json!({
        "requestId": request.request_id.to_string(),
        "status": request.status.to_string(),
        "message": request.message,
        "machines": machines,
    })
}

fn machine_report(m: &Machine) -> Value {
    let mut body = serde_json::Map::new();
    body.insert("machineId".into(), json!(m.machine_id.to_string()));
    body.insert("name".into(), json!(m.name));
    body.insert("status".into(), json!(m.status.to_string()));
    body.insert("instanceType".into(), json!(m.machine_type));
    body.insert("privateIpAddress".into(), json!(m.private_ip));
    body.insert("result".into(), json!(m.result()));
    body.insert("launchtime".into(), json!(m.launched_at.timestamp()));
    if let Some(public_ip) = &m.public_ip {
        body.insert("publicIpAddress".into(), json!(public_ip));
    }
    if !m.message.is_empty() {
        body.insert("message".into(), json!(m.message));
    }
    Value::Object(body)
}
