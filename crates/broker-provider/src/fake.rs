use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use broker_domain::{Machine, ProviderStrategy, Template};

use crate::error::ProviderError;
use crate::handler::{AcquireOutcome, LaunchTemplateRef, ObservedInstance, ObservedInstanceState, ProviderHandler};

/// In-memory `ProviderHandler` for tests that exercise the registry and the
/// engine without talking to AWS. Each acquired instance gets a deterministic
/// synthetic id so call sites can assert on exact values.
///
/// `check_hosts_status` replies are scripted: each call pops the next queued
/// response (or the last one queued, if the queue has been drained), letting
/// a test simulate a sequence of status polls the way §8's end-to-end
/// scenarios describe ("first poll: zero instances", "second poll: both
/// running").
pub struct FakeProviderHandler {
    strategy: ProviderStrategy,
    next_instance: AtomicU32,
    released: Mutex<Vec<(String, usize)>>,
    status_script: Mutex<VecDeque<Vec<ObservedInstance>>>,
    fail_acquire: Mutex<Option<ProviderError>>,
}

impl FakeProviderHandler {
    pub fn new(strategy: ProviderStrategy) -> Self {
        Self {
            strategy,
            next_instance: AtomicU32::new(0),
            released: Mutex::new(Vec::new()),
            status_script: Mutex::new(VecDeque::new()),
            fail_acquire: Mutex::new(None),
        }
    }

    pub fn released_resource_ids(&self) -> Vec<String> {
        self.released.lock().expect("lock poisoned").iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn released_machine_counts(&self) -> Vec<usize> {
        self.released.lock().expect("lock poisoned").iter().map(|(_, n)| *n).collect()
    }

    /// Queues one `check_hosts_status` reply. Calls beyond the queued set
    /// repeat the last queued reply.
    pub fn push_status(&self, instances: Vec<ObservedInstance>) {
        self.status_script.lock().expect("lock poisoned").push_back(instances);
    }

    /// Makes the next `acquire_hosts` call fail with `err` instead of
    /// synthesizing instances.
    pub fn fail_next_acquire(&self, err: ProviderError) {
        *self.fail_acquire.lock().expect("lock poisoned") = Some(err);
    }
}

#[async_trait]
impl ProviderHandler for FakeProviderHandler {
    fn strategy_name(&self) -> &'static str {
        match self.strategy {
            ProviderStrategy::DirectLaunch => "DirectLaunch",
            ProviderStrategy::InstantFleet => "InstantFleet",
            ProviderStrategy::ManagedFleet => "ManagedFleet",
            ProviderStrategy::AutoScalingGroup => "AutoScalingGroup",
            ProviderStrategy::SpotFleet => "SpotFleet",
        }
    }

    async fn create_launch_template(&self, template: &Template) -> Result<LaunchTemplateRef, ProviderError> {
        Ok(LaunchTemplateRef {
            launch_template_id: format!("lt-fake-{}", template.template_id),
            launch_template_version: "1".to_string(),
        })
    }

    async fn acquire_hosts(
        &self,
        _request_id: &str,
        _template: &Template,
        _launch_template: &LaunchTemplateRef,
        count: u32,
    ) -> Result<AcquireOutcome, ProviderError> {
        if let Some(err) = self.fail_acquire.lock().expect("lock poisoned").take() {
            return Err(err);
        }
        let instances = (0..count)
            .map(|_| {
                let n = self.next_instance.fetch_add(1, Ordering::SeqCst);
                ObservedInstance {
                    instance_id: format!("i-{n:08x}"),
                    state: ObservedInstanceState::Pending,
                    private_ip: Some(format!("10.0.0.{}", n % 256)),
                    public_ip: None,
                    instance_type: Some("m5.large".to_string()),
                    availability_zone: Some("us-east-1a".to_string()),
                    spot: false,
                }
            })
            .collect();
        Ok(AcquireOutcome {
            provider_resource_id: format!("resource-fake-{}", self.strategy_name()),
            instances,
        })
    }

    async fn check_hosts_status(&self, _request_id: &str, _provider_resource_id: &str) -> Result<Vec<ObservedInstance>, ProviderError> {
        let mut script = self.status_script.lock().expect("lock poisoned");
        match script.len() {
            0 => Ok(Vec::new()),
            1 => Ok(script.front().cloned().unwrap_or_default()),
            _ => Ok(script.pop_front().unwrap_or_default()),
        }
    }

    async fn release_hosts(&self, _request_id: &str, provider_resource_id: &str, machines: &[Machine]) -> Result<(), ProviderError> {
        self.released
            .lock()
            .expect("lock poisoned")
            .push((provider_resource_id.to_string(), machines.len()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_domain::TemplateFields;

    fn sample_template() -> Template {
        Template::new(TemplateFields {
            template_id: broker_domain::TemplateId::new("tmpl-1").unwrap(),
            provider_strategy: ProviderStrategy::DirectLaunch,
            max_number: 5,
            image: broker_domain::ImageReference::Direct("ami-123".into()),
            network: broker_domain::NetworkPlacement::SingleSubnet("subnet-1".into()),
            machine_type: broker_domain::MachineTypeSpec::Single("m5.large".into()),
            security_group_ids: vec!["sg-1".into()],
            key_name: None,
            user_data: None,
            spot_role: None,
            max_price: None,
            allocation_strategy: None,
        })
        .expect("valid template")
    }

    #[tokio::test]
    async fn acquire_hosts_returns_requested_count() {
        let handler = FakeProviderHandler::new(ProviderStrategy::DirectLaunch);
        let template = sample_template();
        let lt = handler.create_launch_template(&template).await.unwrap();
        let outcome = handler.acquire_hosts("req-1", &template, &lt, 3).await.unwrap();
        assert_eq!(outcome.instances.len(), 3);
    }

    #[tokio::test]
    async fn release_hosts_records_resource_id() {
        let handler = FakeProviderHandler::new(ProviderStrategy::DirectLaunch);
        handler.release_hosts("req-1", "resource-1", &[]).await.unwrap();
        assert_eq!(handler.released_resource_ids(), vec!["resource-1".to_string()]);
    }
}
