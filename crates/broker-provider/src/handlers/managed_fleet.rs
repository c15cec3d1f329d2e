use async_trait::async_trait;
use broker_domain::{Machine, NetworkPlacement, Template};

use crate::ec2_common::create_launch_template;
use crate::ec2_xml::parse_instances_set;
use crate::error::ProviderError;
use crate::handler::{AcquireOutcome, LaunchTemplateRef, ObservedInstance, ProviderHandler};
use crate::retry::{with_retry, RetryPolicy};
use crate::transport::{AwsCredentials, EcAwsTransport};

/// `CreateFleet` with `Type=maintain`: an ongoing fleet EC2 keeps at target
/// capacity, unlike `InstantFleet`'s one-shot launch.
pub struct ManagedFleetHandler {
    transport: EcAwsTransport,
    ec2_base_url: String,
    credentials: AwsCredentials,
    retry: RetryPolicy,
}

impl ManagedFleetHandler {
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
impl ProviderHandler for ManagedFleetHandler {
    fn strategy_name(&self) -> &'static str {
        "ManagedFleet"
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
        _request_id: &str,
        template: &Template,
        launch_template: &LaunchTemplateRef,
        count: u32,
    ) -> Result<AcquireOutcome, ProviderError> {
        let subnets = match &template.network {
            NetworkPlacement::SingleSubnet(s) => vec![s.clone()],
            NetworkPlacement::SubnetSet(subnets) => subnets.clone(),
        };

        let mut owned_params = vec![
            ("Action".to_string(), "CreateFleet".to_string()),
            ("Version".to_string(), "2016-11-15".to_string()),
            ("Type".to_string(), "maintain".to_string()),
            (
                "LaunchTemplateConfigs.1.LaunchTemplateSpecification.LaunchTemplateId".to_string(),
                launch_template.launch_template_id.clone(),
            ),
            (
                "LaunchTemplateConfigs.1.LaunchTemplateSpecification.Version".to_string(),
                launch_template.launch_template_version.clone(),
            ),
            ("TargetCapacitySpecification.TotalTargetCapacity".to_string(), count.to_string()),
            ("TargetCapacitySpecification.DefaultTargetCapacityType".to_string(), "on-demand".to_string()),
        ];
        for (i, subnet) in subnets.iter().enumerate() {
            owned_params.push((
                format!("LaunchTemplateConfigs.1.Overrides.{}.SubnetId", i + 1),
                subnet.clone(),
            ));
        }

        let params: Vec<(&str, &str)> = owned_params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let xml = with_retry(&self.retry, || {
            self.transport.query(&self.ec2_base_url, "ec2", &self.credentials, &params)
        })
        .await?;

        let fleet_id = crate::transport::xml_text(&xml, "fleetId")
            .ok_or_else(|| ProviderError::Internal("CreateFleet: no fleetId".into()))?;

        // A maintain fleet doesn't launch synchronously; the reconciler polls
        // `check_hosts_status` for the instances it brings up.
        Ok(AcquireOutcome {
            provider_resource_id: fleet_id,
            instances: Vec::new(),
        })
    }

    async fn check_hosts_status(&self, _request_id: &str, provider_resource_id: &str) -> Result<Vec<ObservedInstance>, ProviderError> {
        let params = [
            ("Action", "DescribeFleetInstances"),
            ("Version", "2016-11-15"),
            ("FleetId", provider_resource_id),
        ];
        let xml = with_retry(&self.retry, || {
            self.transport.query(&self.ec2_base_url, "ec2", &self.credentials, &params)
        })
        .await?;
        Ok(parse_instances_set(&xml))
    }

    /// A return covering every instance the fleet currently has deletes the
    /// fleet outright; a subset instead shrinks target capacity by the
    /// returned count and terminates just those instances, leaving the rest
    /// of the fleet running (§4.6).
    async fn release_hosts(&self, request_id: &str, provider_resource_id: &str, machines: &[Machine]) -> Result<(), ProviderError> {
        let current = self.check_hosts_status(request_id, provider_resource_id).await.unwrap_or_default();
        if current.is_empty() || machines.len() >= current.len() {
            let params = [
                ("Action", "DeleteFleets"),
                ("Version", "2016-11-15"),
                ("FleetId.1", provider_resource_id),
                ("TerminateInstances", "true"),
            ];
            with_retry(&self.retry, || {
                self.transport.query(&self.ec2_base_url, "ec2", &self.credentials, &params)
            })
            .await?;
            return Ok(());
        }

        let remaining = (current.len() - machines.len()).to_string();
        let params = [
            ("Action", "ModifyFleet"),
            ("Version", "2016-11-15"),
            ("FleetId", provider_resource_id),
            ("TargetCapacitySpecification.TotalTargetCapacity", remaining.as_str()),
            ("ExcessCapacityTerminationPolicy", "no-termination"),
        ];
        with_retry(&self.retry, || {
            self.transport.query(&self.ec2_base_url, "ec2", &self.credentials, &params)
        })
        .await?;

        let instance_ids: Vec<String> = machines.iter().map(|m| m.machine_id.to_string()).collect();
        crate::ec2_common::terminate_instances(
            &self.transport,
            &self.ec2_base_url,
            &self.credentials,
            &self.retry,
            &instance_ids,
        )
        .await
    }
}
