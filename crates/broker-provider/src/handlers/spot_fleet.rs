use async_trait::async_trait;
use broker_domain::{Machine, NetworkPlacement, Template};
use regex::Regex;

use crate::ec2_common::create_launch_template;
use crate::ec2_xml::parse_instances_set;
use crate::error::ProviderError;
use crate::handler::{AcquireOutcome, LaunchTemplateRef, ObservedInstance, ProviderHandler};
use crate::retry::{with_retry, RetryPolicy};
use crate::transport::{xml_text, AwsCredentials, EcAwsTransport};

/// Matches a well-formed IAM role ARN, e.g.
/// `arn:aws:iam::123456789012:role/aws-ec2-spot-fleet-tagging-role`.
const ROLE_ARN_PATTERN: &str = r"^arn:aws:iam::\d{12}:role/[\w+=,.@-]+$";

/// The default spot fleet service-linked role AWS provisions under
/// `aws iam create-service-linked-role --aws-service-name spotfleet.amazonaws.com`,
/// accepted by its bare name as an alternative to a full ARN.
const SPOT_FLEET_SERVICE_LINKED_ROLE_NAME: &str = "AWSServiceRoleForEC2SpotFleet";

fn validate_spot_role(spot_role: &str) -> Result<(), ProviderError> {
    if spot_role == SPOT_FLEET_SERVICE_LINKED_ROLE_NAME {
        return Ok(());
    }
    let pattern = Regex::new(ROLE_ARN_PATTERN).expect("role ARN pattern is a valid regex");
    if pattern.is_match(spot_role) {
        return Ok(());
    }
    Err(ProviderError::Validation(format!(
        "spot_role '{spot_role}' is neither a valid IAM role ARN nor the '{SPOT_FLEET_SERVICE_LINKED_ROLE_NAME}' service-linked role"
    )))
}

/// `RequestSpotFleet`/`DescribeSpotFleetInstances`/`CancelSpotFleetRequests`,
/// the strategy requiring a `spot_role` on the template (validated at the
/// domain layer, not re-checked here).
pub struct SpotFleetHandler {
    transport: EcAwsTransport,
    ec2_base_url: String,
    credentials: AwsCredentials,
    retry: RetryPolicy,
}

impl SpotFleetHandler {
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
impl ProviderHandler for SpotFleetHandler {
    fn strategy_name(&self) -> &'static str {
        "SpotFleet"
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
            NetworkPlacement::SingleSubnet(s) => s.clone(),
            NetworkPlacement::SubnetSet(subnets) => subnets.join(","),
        };
        let spot_role = template
            .spot_role
            .as_deref()
            .ok_or_else(|| ProviderError::Validation("SpotFleet template is missing spot_role".into()))?;
        validate_spot_role(spot_role)?;

        let mut owned_params = vec![
            ("Action".to_string(), "RequestSpotFleet".to_string()),
            ("Version".to_string(), "2016-11-15".to_string()),
            ("SpotFleetRequestConfig.IamFleetRole".to_string(), spot_role.to_string()),
            ("SpotFleetRequestConfig.TargetCapacity".to_string(), count.to_string()),
            (
                "SpotFleetRequestConfig.LaunchTemplateConfigs.1.LaunchTemplateSpecification.LaunchTemplateId".to_string(),
                launch_template.launch_template_id.clone(),
            ),
            (
                "SpotFleetRequestConfig.LaunchTemplateConfigs.1.LaunchTemplateSpecification.Version".to_string(),
                launch_template.launch_template_version.clone(),
            ),
            (
                "SpotFleetRequestConfig.LaunchTemplateConfigs.1.Overrides.1.SubnetId".to_string(),
                subnets,
            ),
        ];
        if let Some(price) = template.max_price {
            owned_params.push(("SpotFleetRequestConfig.SpotPrice".to_string(), price.to_string()));
        }
        if let Some(strategy) = &template.allocation_strategy {
            owned_params.push(("SpotFleetRequestConfig.AllocationStrategy".to_string(), strategy.clone()));
        }

        let params: Vec<(&str, &str)> = owned_params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let xml = with_retry(&self.retry, || {
            self.transport.query(&self.ec2_base_url, "ec2", &self.credentials, &params)
        })
        .await?;

        let request_id = xml_text(&xml, "spotFleetRequestId")
            .ok_or_else(|| ProviderError::Internal("RequestSpotFleet: no spotFleetRequestId".into()))?;

        Ok(AcquireOutcome {
            provider_resource_id: request_id,
            instances: Vec::new(),
        })
    }

    async fn check_hosts_status(&self, _request_id: &str, provider_resource_id: &str) -> Result<Vec<ObservedInstance>, ProviderError> {
        let params = [
            ("Action", "DescribeSpotFleetInstances"),
            ("Version", "2016-11-15"),
            ("SpotFleetRequestId", provider_resource_id),
        ];
        let xml = with_retry(&self.retry, || {
            self.transport.query(&self.ec2_base_url, "ec2", &self.credentials, &params)
        })
        .await?;
        Ok(parse_instances_set(&xml))
    }

    /// Same shape as `ManagedFleetHandler::release_hosts`: a full return
    /// cancels the spot fleet request outright, a partial return shrinks
    /// target capacity and terminates only the returned instances.
    async fn release_hosts(&self, request_id: &str, provider_resource_id: &str, machines: &[Machine]) -> Result<(), ProviderError> {
        let current = self.check_hosts_status(request_id, provider_resource_id).await.unwrap_or_default();
        if current.is_empty() || machines.len() >= current.len() {
            let params = [
                ("Action", "CancelSpotFleetRequests"),
                ("Version", "2016-11-15"),
                ("SpotFleetRequestId.1", provider_resource_id),
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
            ("Action", "ModifySpotFleetRequest"),
            ("Version", "2016-11-15"),
            ("SpotFleetRequestId", provider_resource_id),
            ("TargetCapacity", remaining.as_str()),
            ("ExcessCapacityTerminationPolicy", "noTermination"),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_a_well_formed_role_arn() {
        assert!(validate_spot_role("arn:aws:iam::123456789012:role/spot-fleet-role").is_ok());
    }

    #[test]
    fn accepts_the_default_service_linked_role_name() {
        assert!(validate_spot_role(SPOT_FLEET_SERVICE_LINKED_ROLE_NAME).is_ok());
    }

    #[test]
    fn rejects_a_malformed_reference() {
        assert!(validate_spot_role("not-a-role-arn").is_err());
        assert!(validate_spot_role("arn:aws:iam::not-an-account:role/x").is_err());
    }
}
