use async_trait::async_trait;
use broker_domain::{Machine, NetworkPlacement, Template};

use crate::ec2_common::{create_launch_template, describe_instances};
use crate::ec2_xml::parse_instances_set;
use crate::error::ProviderError;
use crate::handler::{AcquireOutcome, LaunchTemplateRef, ObservedInstance, ProviderHandler};
use crate::retry::{with_retry, RetryPolicy};
use crate::transport::{xml_all_texts, AwsCredentials, EcAwsTransport};

/// Drives the separate Auto Scaling Query API
/// (`CreateAutoScalingGroup`/`DescribeAutoScalingGroups`/`DeleteAutoScalingGroup`),
/// falling back to EC2 `DescribeInstances` for instance detail since ASG's own
/// describe call only returns instance ids and lifecycle state.
pub struct AutoScalingGroupHandler {
    transport: EcAwsTransport,
    ec2_base_url: String,
    asg_base_url: String,
    credentials: AwsCredentials,
    retry: RetryPolicy,
}

impl AutoScalingGroupHandler {
    pub fn new(region: impl Into<String>, credentials: AwsCredentials, retry: RetryPolicy) -> Self {
        let region = region.into();
        let ec2_base_url = format!("https://ec2.{region}.amazonaws.com");
        let asg_base_url = format!("https://autoscaling.{region}.amazonaws.com");
        Self {
            transport: EcAwsTransport::new(region),
            ec2_base_url,
            asg_base_url,
            credentials,
            retry,
        }
    }

    fn asg_name(&self, template_id: &str, launch_template_id: &str) -> String {
        format!("broker-{template_id}-{launch_template_id}")
    }
}

#[async_trait]
impl ProviderHandler for AutoScalingGroupHandler {
    fn strategy_name(&self) -> &'static str {
        "AutoScalingGroup"
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
        let asg_name = self.asg_name(&template.template_id.to_string(), &launch_template.launch_template_id);

        let params = [
            ("Action", "CreateAutoScalingGroup"),
            ("Version", "2011-01-01"),
            ("AutoScalingGroupName", &asg_name),
            ("LaunchTemplate.LaunchTemplateId", &launch_template.launch_template_id),
            ("LaunchTemplate.Version", &launch_template.launch_template_version),
            ("MinSize", "0"),
            ("MaxSize", &count.to_string()),
            ("DesiredCapacity", &count.to_string()),
            ("VPCZoneIdentifier", &subnets.join(",")),
        ];

        with_retry(&self.retry, || {
            self.transport.query(&self.asg_base_url, "autoscaling", &self.credentials, &params)
        })
        .await?;

        // ASG creation doesn't return instances synchronously; the reconciler
        // polls `check_hosts_status` until the desired capacity comes online.
        Ok(AcquireOutcome {
            provider_resource_id: asg_name,
            instances: Vec::new(),
        })
    }

    async fn check_hosts_status(&self, _request_id: &str, provider_resource_id: &str) -> Result<Vec<ObservedInstance>, ProviderError> {
        let params = [
            ("Action", "DescribeAutoScalingGroups"),
            ("Version", "2011-01-01"),
            ("AutoScalingGroupNames.member.1", provider_resource_id),
        ];
        let xml = with_retry(&self.retry, || {
            self.transport.query(&self.asg_base_url, "autoscaling", &self.credentials, &params)
        })
        .await?;

        let instance_ids = xml_all_texts(&xml, "InstanceId");
        if instance_ids.is_empty() {
            return Ok(Vec::new());
        }
        let describe_xml = describe_instances(
            &self.transport,
            &self.ec2_base_url,
            &self.credentials,
            &self.retry,
            &instance_ids,
        )
        .await?;
        Ok(parse_instances_set(&describe_xml))
    }

    /// A full return (every instance the group currently has) force-deletes
    /// the group; a partial return instead detaches the returned instances
    /// with `ShouldDecrementDesiredCapacity` and terminates them directly,
    /// leaving the rest of the group at its new, lower desired capacity.
    async fn release_hosts(&self, request_id: &str, provider_resource_id: &str, machines: &[Machine]) -> Result<(), ProviderError> {
        let current_count = self
            .check_hosts_status(request_id, provider_resource_id)
            .await
            .map(|v| v.len())
            .unwrap_or(0);

        if current_count == 0 || machines.len() >= current_count {
            let params = [
                ("Action", "DeleteAutoScalingGroup"),
                ("Version", "2011-01-01"),
                ("AutoScalingGroupName", provider_resource_id),
                ("ForceDelete", "true"),
            ];
            with_retry(&self.retry, || {
                self.transport.query(&self.asg_base_url, "autoscaling", &self.credentials, &params)
            })
            .await?;
            return Ok(());
        }

        let instance_ids: Vec<String> = machines.iter().map(|m| m.machine_id.to_string()).collect();
        let mut owned_params: Vec<(String, String)> = instance_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (format!("InstanceIds.member.{}", i + 1), id.clone()))
            .collect();
        owned_params.push(("Action".to_string(), "DetachInstances".to_string()));
        owned_params.push(("Version".to_string(), "2011-01-01".to_string()));
        owned_params.push(("AutoScalingGroupName".to_string(), provider_resource_id.to_string()));
        owned_params.push(("ShouldDecrementDesiredCapacity".to_string(), "true".to_string()));
        let params: Vec<(&str, &str)> = owned_params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        with_retry(&self.retry, || {
            self.transport.query(&self.asg_base_url, "autoscaling", &self.credentials, &params)
        })
        .await?;

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
