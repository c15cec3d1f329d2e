use async_trait::async_trait;
use broker_domain::{Machine, Template};

use crate::error::ProviderError;

/// A launch template created ahead of acquisition, reused across every
/// instance/fleet/ASG request against one template (§4.6).
#[derive(Debug, Clone)]
pub struct LaunchTemplateRef {
    pub launch_template_id: String,
    pub launch_template_version: String,
}

/// One instance record as reported by the provider, not yet folded into a
/// `Machine` aggregate — that's the reconciler's job (§4.5).
#[derive(Debug, Clone)]
pub struct ObservedInstance {
    pub instance_id: String,
    pub state: ObservedInstanceState,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
    pub instance_type: Option<String>,
    pub availability_zone: Option<String>,
    /// Carries a spot-instance-request id when the provider indicates this
    /// instance was fulfilled against a spot request (§4.5 "price tier").
    pub spot: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedInstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
    /// A provider state string the broker doesn't recognize (§4.5).
    Unknown,
}

/// Outcome of `acquire_hosts`: the provider-side resource id (fleet id, ASG
/// name, spot fleet request id, or a synthetic id for direct launches) plus
/// whatever instances the call returned synchronously.
pub struct AcquireOutcome {
    pub provider_resource_id: String,
    pub instances: Vec<ObservedInstance>,
}

/// Common contract every provider-strategy handler implements (§4.6).
///
/// One async-trait object per provisioning strategy, registered and
/// dispatched by tag; each variant drives one of the five EC2 acquisition
/// strategies through the shared `EcAwsTransport`.
#[async_trait]
pub trait ProviderHandler: Send + Sync {
    fn strategy_name(&self) -> &'static str;

    async fn create_launch_template(
        &self,
        template: &Template,
    ) -> Result<LaunchTemplateRef, ProviderError>;

    async fn acquire_hosts(
        &self,
        request_id: &str,
        template: &Template,
        launch_template: &LaunchTemplateRef,
        count: u32,
    ) -> Result<AcquireOutcome, ProviderError>;

    async fn check_hosts_status(
        &self,
        request_id: &str,
        provider_resource_id: &str,
    ) -> Result<Vec<ObservedInstance>, ProviderError>;

    async fn release_hosts(
        &self,
        request_id: &str,
        provider_resource_id: &str,
        machines: &[Machine],
    ) -> Result<(), ProviderError>;
}
