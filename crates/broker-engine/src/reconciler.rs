use async_trait::async_trait;
use broker_domain::{
    Event, Machine, MachineId, MachineStatus, NewMachine, PriceTier, ProviderStrategy, Request,
};
use broker_provider::{ObservedInstance, ObservedInstanceState};
use chrono::Utc;

use crate::error::EngineError;

/// Runs an out-of-band health probe against an already-created `Machine`.
/// Pluggable the same way `ImageAliasResolver` is: the core has no opinion
/// on what "healthy" means for a given cloud, only that the outcome gets
/// folded into `Machine::record_health_check` (§4.5).
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check(&self, machine: &Machine) -> Vec<(String, bool, serde_json::Value)>;
}

/// A `HealthChecker` that always reports healthy, for tests and for
/// deployments that haven't wired a real cloud client yet.
pub struct NoopHealthChecker;

#[async_trait]
impl HealthChecker for NoopHealthChecker {
    async fn check(&self, _machine: &Machine) -> Vec<(String, bool, serde_json::Value)> {
        Vec::new()
    }
}

fn to_domain_status(state: ObservedInstanceState) -> MachineStatus {
    match state {
        ObservedInstanceState::Pending => MachineStatus::Pending,
        ObservedInstanceState::Running => MachineStatus::Running,
        ObservedInstanceState::Stopping => MachineStatus::Stopping,
        ObservedInstanceState::Stopped => MachineStatus::Stopped,
        ObservedInstanceState::ShuttingDown => MachineStatus::ShuttingDown,
        ObservedInstanceState::Terminated => MachineStatus::Terminated,
        ObservedInstanceState::Unknown => MachineStatus::Unknown,
    }
}

/// §4.4's state machine only lets `Pending` advance to `Running` or `Failed`
/// — a provider that reports an instance terminated (capacity, spot
/// reclaim) before it was ever observed running has no direct `Pending` ->
/// `Terminated` edge. Fold that case (and the other states `Pending` can't
/// reach directly) onto `Failed`, since the machine never ran.
fn reachable_target(current: MachineStatus, desired: MachineStatus) -> MachineStatus {
    use MachineStatus::*;
    match (current, desired) {
        (Pending, Terminated | Stopping | Stopped | ShuttingDown) => Failed,
        _ => desired,
    }
}

/// Default interval between health checks for a `Running` machine (§4.5).
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: i64 = 300;

/// Maps provider instance records onto `Machine` aggregates (§4.5). Creation
/// happens exactly once, at first observation; subsequent polls that see the
/// same instance id only advance its status.
pub struct MachineReconciler {
    health_checker: Option<std::sync::Arc<dyn HealthChecker>>,
    health_check_interval_secs: i64,
}

impl MachineReconciler {
    pub fn new(health_checker: Option<std::sync::Arc<dyn HealthChecker>>) -> Self {
        Self {
            health_checker,
            health_check_interval_secs: DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
        }
    }

    pub fn with_health_check_interval_secs(mut self, secs: i64) -> Self {
        self.health_check_interval_secs = secs;
        self
    }

    /// Re-runs the health probe for a `Running` machine whose last check is
    /// older than the configured interval (§4.5: "health checks run
    /// periodically ... while a Machine is in Running"). A no-op for
    /// machines with no prior check due yet, or with no checker configured.
    pub async fn refresh_health_if_due(&self, machine: &mut Machine) -> Option<Event> {
        let checker = self.health_checker.as_ref()?;
        if machine.status != MachineStatus::Running {
            return None;
        }
        let last_check = machine.health_checks.values().filter_map(|c| c.last_check).max();
        let due = match last_check {
            Some(last) => Utc::now().signed_duration_since(last).num_seconds() >= self.health_check_interval_secs,
            None => true,
        };
        if !due {
            return None;
        }
        let mut last_event = None;
        for (check_type, healthy, details) in checker.check(machine).await {
            last_event = Some(machine.record_health_check(check_type, healthy, details));
        }
        last_event
    }

    /// Folds one not-yet-seen `ObservedInstance` into a new `Machine` owned
    /// by `request`, running an initial health check if a checker is
    /// configured (creation proceeds either way, per §4.5: "on health-check
    /// failure, the Machine is created anyway").
    pub async fn create_machine(
        &self,
        request: &Request,
        observed: &ObservedInstance,
    ) -> Result<(Machine, Vec<Event>), EngineError> {
        let machine_id = MachineId::new(&observed.instance_id)
            .map_err(|_| EngineError::Validation(format!("provider returned non-conforming instance id '{}'", observed.instance_id)))?;

        let (mut machine, creation_event) = Machine::create(NewMachine {
            machine_id,
            request_id: request.request_id.clone(),
            name: observed.instance_id.clone(),
            machine_type: observed.instance_type.clone().unwrap_or_else(|| "unknown".to_string()),
            private_ip: observed.private_ip.clone().unwrap_or_default(),
            public_ip: observed.public_ip.clone(),
            provider_strategy: request.provider_strategy.unwrap_or(ProviderStrategy::DirectLaunch),
            resource_id: request.resource_id.clone().unwrap_or_default(),
            price_tier: if observed.spot { PriceTier::Spot } else { PriceTier::OnDemand },
            tags: request.tags.clone(),
        });

        let mut events = vec![creation_event];

        let target = reachable_target(machine.status, to_domain_status(observed.state));
        if target != MachineStatus::Pending {
            let reason = (target == MachineStatus::Failed).then(|| "instance terminated before reaching running state".to_string());
            if let Ok(event) = machine.transition(target, reason) {
                events.push(event);
            }
        }

        if let Some(checker) = &self.health_checker {
            for (check_type, healthy, details) in checker.check(&machine).await {
                events.push(machine.record_health_check(check_type, healthy, details));
            }
        }

        Ok((machine, events))
    }

    /// Advances an already-known `Machine`'s status from a later observation.
    /// A no-op transition (same state reported twice) and a transition the
    /// state machine forbids are both swallowed rather than surfaced — a
    /// duplicate or stale status report must not fail the whole poll
    /// (§4.3 "idempotent status poll" edge case).
    pub fn reconcile_existing(&self, machine: &mut Machine, observed: &ObservedInstance) -> Option<Event> {
        let target = reachable_target(machine.status, to_domain_status(observed.state));
        if target == machine.status {
            return None;
        }
        let reason = (target == MachineStatus::Failed).then(|| "instance terminated before reaching running state".to_string());
        machine.transition(target, reason).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_domain::TemplateId;
    use std::collections::HashMap;

    fn acquire_request() -> Request {
        let (mut req, _) = Request::create_acquire(
            TemplateId::new("t1").unwrap(),
            2,
            ProviderStrategy::DirectLaunch,
            None,
            HashMap::new(),
            serde_json::Value::Null,
        );
        req.resource_id = Some("reservation-1".to_string());
        req
    }

    fn observed(id: &str, state: ObservedInstanceState) -> ObservedInstance {
        ObservedInstance {
            instance_id: id.to_string(),
            state,
            private_ip: Some("10.0.0.5".to_string()),
            public_ip: None,
            instance_type: Some("m5.large".to_string()),
            availability_zone: Some("us-east-1a".to_string()),
            spot: false,
        }
    }

    #[tokio::test]
    async fn create_machine_applies_observed_running_state() {
        let reconciler = MachineReconciler::new(None);
        let req = acquire_request();
        let (machine, events) = reconciler
            .create_machine(&req, &observed("i-0aaa0000", ObservedInstanceState::Running))
            .await
            .unwrap();
        assert_eq!(machine.status, MachineStatus::Running);
        assert_eq!(events.len(), 2); // creation + transition to Running
    }

    #[tokio::test]
    async fn create_machine_rejects_non_conforming_instance_id() {
        let reconciler = MachineReconciler::new(None);
        let req = acquire_request();
        let err = reconciler
            .create_machine(&req, &observed("bogus-id", ObservedInstanceState::Pending))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn reconcile_existing_is_idempotent_on_repeat_status() {
        let reconciler = MachineReconciler::new(None);
        let req = acquire_request();
        let (mut machine, _) = reconciler
            .create_machine(&req, &observed("i-0aaa0000", ObservedInstanceState::Running))
            .await
            .unwrap();
        let event = reconciler.reconcile_existing(&mut machine, &observed("i-0aaa0000", ObservedInstanceState::Running));
        assert!(event.is_none());
    }

    #[tokio::test]
    async fn refresh_health_if_due_skips_non_running_machines() {
        struct AlwaysHealthy;
        #[async_trait]
        impl HealthChecker for AlwaysHealthy {
            async fn check(&self, _machine: &Machine) -> Vec<(String, bool, serde_json::Value)> {
                vec![("instance-status".to_string(), true, serde_json::json!({}))]
            }
        }
        let reconciler =
            MachineReconciler::new(Some(std::sync::Arc::new(AlwaysHealthy))).with_health_check_interval_secs(0);
        let req = acquire_request();
        let (mut machine, _) = reconciler
            .create_machine(&req, &observed("i-0aaa0000", ObservedInstanceState::Pending))
            .await
            .unwrap();
        assert_eq!(machine.status, MachineStatus::Pending);
        assert!(reconciler.refresh_health_if_due(&mut machine).await.is_none());
    }

    #[tokio::test]
    async fn refresh_health_if_due_reprobes_running_machines_past_the_interval() {
        struct AlwaysHealthy;
        #[async_trait]
        impl HealthChecker for AlwaysHealthy {
            async fn check(&self, _machine: &Machine) -> Vec<(String, bool, serde_json::Value)> {
                vec![("instance-status".to_string(), true, serde_json::json!({}))]
            }
        }
        let reconciler =
            MachineReconciler::new(Some(std::sync::Arc::new(AlwaysHealthy))).with_health_check_interval_secs(0);
        let req = acquire_request();
        let (mut machine, _) = reconciler
            .create_machine(&req, &observed("i-0aaa0000", ObservedInstanceState::Running))
            .await
            .unwrap();
        let before = machine.health_checks.get("instance-status").unwrap().history.len();
        let event = reconciler.refresh_health_if_due(&mut machine).await;
        assert!(event.is_some());
        let after = machine.health_checks.get("instance-status").unwrap().history.len();
        assert_eq!(after, before + 1);
    }

    #[tokio::test]
    async fn refresh_health_if_due_is_a_no_op_before_the_interval_elapses() {
        struct AlwaysHealthy;
        #[async_trait]
        impl HealthChecker for AlwaysHealthy {
            async fn check(&self, _machine: &Machine) -> Vec<(String, bool, serde_json::Value)> {
                vec![("instance-status".to_string(), true, serde_json::json!({}))]
            }
        }
        let reconciler = MachineReconciler::new(Some(std::sync::Arc::new(AlwaysHealthy)));
        let req = acquire_request();
        let (mut machine, _) = reconciler
            .create_machine(&req, &observed("i-0aaa0000", ObservedInstanceState::Running))
            .await
            .unwrap();
        assert!(reconciler.refresh_health_if_due(&mut machine).await.is_none());
    }

    #[tokio::test]
    async fn health_checker_failure_does_not_block_machine_creation() {
        struct AlwaysUnhealthy;
        #[async_trait]
        impl HealthChecker for AlwaysUnhealthy {
            async fn check(&self, _machine: &Machine) -> Vec<(String, bool, serde_json::Value)> {
                vec![("instance-status".to_string(), false, serde_json::json!({}))]
            }
        }
        let reconciler = MachineReconciler::new(Some(std::sync::Arc::new(AlwaysUnhealthy)));
        let req = acquire_request();
        let (machine, events) = reconciler
            .create_machine(&req, &observed("i-0aaa0000", ObservedInstanceState::Running))
            .await
            .unwrap();
        assert!(!machine.is_healthy());
        assert_eq!(events.len(), 3); // creation + status transition + health check
    }
}
