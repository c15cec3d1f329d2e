use async_trait::async_trait;
use broker_domain::{Machine, NetworkPlacement, Template};

use crate::ec2_common::{create_launch_template, describe_instances_by_request_tag, request_id_tag_params, terminate_instances};
use crate::ec2_xml::parse_instances_set;
use crate::error::ProviderError;
use crate::handler::{AcquireOutcome, LaunchTemplateRef, ObservedInstance, ProviderHandler};
use crate::retry::RetryPolicy;
use crate::transport::{AwsCredentials, EcAwsTransport};

/// Plain `RunInstances`: no fleet/ASG wrapper, the "DirectLaunch" strategy.
/// The provider resource id is synthesized from the reservation id since
/// RunInstances has no separate fleet-level handle.
pub struct DirectLaunchHandler {
    transport: EcAwsTransport,
    ec2_base_url: String,
    credentials: AwsCredentials,
    retry: RetryPolicy,
}

impl DirectLaunchHandler {
    pub fn new(region: impl Into<String>, credentials: AwsCredentials, retry: RetryPolicy) -> Self {
        let region = region.into();
        let ec2_base_url = format!("https://ec2.{region}.amazonaws.com");
        Self {
            transport: EcAwsTransport::new(region),
            ec2_base_url,
            credentials,
            retry,
        }
    }
}

#[async_trait]
impl ProviderHandler for DirectLaunchHandler {
    fn strategy_name(&self) -> &'static str {
        "DirectLaunch"
    }

    async fn create_launch_template(&self, template: &Template) -> Result<LaunchTemplateRef, ProviderError> {
        create_launch_template(
            &self.transport,
            &self.ec2_base_url,
            &self.credentials,
            &self.retry,
            template,
        )
        .await
    }

    async fn acquire_hosts(
        &self,
        request_id: &str,
        template: &Template,
        launch_template: &LaunchTemplateRef,
        count: u32,
    ) -> Result<AcquireOutcome, ProviderError> {
        let subnet_id = match &template.network {
            NetworkPlacement::SingleSubnet(s) => s.clone(),
            NetworkPlacement::SubnetSet(subnets) => subnets
                .first()
                .cloned()
                .ok_or_else(|| ProviderError::Validation("subnet set is empty".into()))?,
        };

        let mut owned_params = vec![
            ("Action".to_string(), "RunInstances".to_string()),
            ("Version".to_string(), "2016-11-15".to_string()),
            ("LaunchTemplate.LaunchTemplateId".to_string(), launch_template.launch_template_id.clone()),
            ("LaunchTemplate.Version".to_string(), launch_template.launch_template_version.clone()),
            ("MinCount".to_string(), count.to_string()),
            ("MaxCount".to_string(), count.to_string()),
            ("SubnetId".to_string(), subnet_id),
        ];
        owned_params.extend(request_id_tag_params(request_id));

        let params: Vec<(&str, &str)> = owned_params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let xml = crate::retry::with_retry(&self.retry, || {
            self.transport.query(&self.ec2_base_url, "ec2", &self.credentials, &params)
        })
        .await?;

        let reservation_id = crate::transport::xml_text(&xml, "reservationId")
            .unwrap_or_else(|| format!("reservation-{}", uuid::Uuid::new_v4()));
        let instances = parse_instances_set(&xml);

        Ok(AcquireOutcome {
            provider_resource_id: reservation_id,
            instances,
        })
    }

    async fn check_hosts_status(&self, request_id: &str, _provider_resource_id: &str) -> Result<Vec<ObservedInstance>, ProviderError> {
        // The resource id is a reservation id, not queryable on its own;
        // instances are tagged at launch with the request id and found back
        // by that tag instead (§4.6's "tag correlation with the request id").
        let xml = describe_instances_by_request_tag(
            &self.transport,
            &self.ec2_base_url,
            &self.credentials,
            &self.retry,
            request_id,
        )
        .await?;
        Ok(parse_instances_set(&xml))
    }

    async fn release_hosts(&self, _request_id: &str, _provider_resource_id: &str, machines: &[Machine]) -> Result<(), ProviderError> {
        let instance_ids: Vec<String> = machines
            .iter()
            .map(|m| m.machine_id.to_string())
            .collect();
        terminate_instances(
            &self.transport,
            &self.ec2_base_url,
            &self.credentials,
            &self.retry,
            &instance_ids,
        )
        .await
    }
}
