use base64::Engine;
use broker_domain::{ImageReference, MachineTypeSpec, Template};

use crate::error::ProviderError;
use crate::handler::LaunchTemplateRef;
use crate::retry::{with_retry, RetryPolicy};
use crate::transport::{xml_text, AwsCredentials, EcAwsTransport};

/// Tag key instances are stamped with at launch so a later status poll can
/// find them back by request id rather than by an instance-id list the
/// acquire call never actually produced (DirectLaunch's resource id is a
/// reservation id, not an instance id).
pub const REQUEST_ID_TAG_KEY: &str = "broker:request-id";

/// `TagSpecification` parameters for `RunInstances`/`CreateFleet`-family
/// calls that tag every launched instance with the owning request id.
pub fn request_id_tag_params(request_id: &str) -> Vec<(String, String)> {
    vec![
        ("TagSpecification.1.ResourceType".to_string(), "instance".to_string()),
        ("TagSpecification.1.Tag.1.Key".to_string(), REQUEST_ID_TAG_KEY.to_string()),
        ("TagSpecification.1.Tag.1.Value".to_string(), request_id.to_string()),
    ]
}

/// Builds the `CreateLaunchTemplate` Query-API parameters for a template.
/// Shared by every handler variant since launch-template creation doesn't
/// vary by acquisition strategy (§4.6's contract table lists it once).
fn launch_template_params(template: &Template) -> Result<Vec<(String, String)>, ProviderError> {
    let image_id = match &template.image {
        ImageReference::Direct(id) => id.clone(),
        ImageReference::Alias(alias) => {
            return Err(ProviderError::Validation(format!(
                "image alias '{alias}' was not resolved before reaching the provider handler"
            )))
        }
    };

    let mut params = vec![
        ("LaunchTemplateName".to_string(), format!("broker-{}", template.template_id)),
        ("LaunchTemplateData.ImageId".to_string(), image_id),
    ];

    if let MachineTypeSpec::Single(instance_type) = &template.machine_type {
        params.push(("LaunchTemplateData.InstanceType".to_string(), instance_type.clone()));
    }
    if let Some(key_name) = &template.key_name {
        params.push(("LaunchTemplateData.KeyName".to_string(), key_name.clone()));
    }
    if let Some(user_data) = &template.user_data {
        let encoded = base64::engine::general_purpose::STANDARD.encode(user_data);
        params.push(("LaunchTemplateData.UserData".to_string(), encoded));
    }
    for (i, sg) in template.security_group_ids.iter().enumerate() {
        params.push((
            format!("LaunchTemplateData.SecurityGroupId.{}", i + 1),
            sg.clone(),
        ));
    }
    Ok(params)
}

pub async fn create_launch_template(
    transport: &EcAwsTransport,
    ec2_base_url: &str,
    creds: &AwsCredentials,
    retry: &RetryPolicy,
    template: &Template,
) -> Result<LaunchTemplateRef, ProviderError> {
    let owned_params = launch_template_params(template)?;
    let params: Vec<(&str, &str)> = owned_params
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .chain([("Action", "CreateLaunchTemplate"), ("Version", "2016-11-15")])
        .collect();

    let xml = with_retry(retry, || transport.query(ec2_base_url, "ec2", creds, &params)).await?;

    let id = xml_text(&xml, "launchTemplateId")
        .ok_or_else(|| ProviderError::Internal("CreateLaunchTemplate: no launchTemplateId".into()))?;
    let version = xml_text(&xml, "version").unwrap_or_else(|| "1".to_string());
    Ok(LaunchTemplateRef {
        launch_template_id: id,
        launch_template_version: version,
    })
}

pub async fn terminate_instances(
    transport: &EcAwsTransport,
    ec2_base_url: &str,
    creds: &AwsCredentials,
    retry: &RetryPolicy,
    instance_ids: &[String],
) -> Result<(), ProviderError> {
    if instance_ids.is_empty() {
        return Ok(());
    }
    let mut owned_params: Vec<(String, String)> = instance_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (format!("InstanceId.{}", i + 1), id.clone()))
        .collect();
    owned_params.push(("Action".to_string(), "TerminateInstances".to_string()));
    owned_params.push(("Version".to_string(), "2016-11-15".to_string()));
    let params: Vec<(&str, &str)> = owned_params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

    with_retry(retry, || transport.query(ec2_base_url, "ec2", creds, &params)).await?;
    Ok(())
}

pub async fn describe_instances(
    transport: &EcAwsTransport,
    ec2_base_url: &str,
    creds: &AwsCredentials,
    retry: &RetryPolicy,
    instance_ids: &[String],
) -> Result<String, ProviderError> {
    let mut owned_params: Vec<(String, String)> = instance_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (format!("InstanceId.{}", i + 1), id.clone()))
        .collect();
    owned_params.push(("Action".to_string(), "DescribeInstances".to_string()));
    owned_params.push(("Version".to_string(), "2016-11-15".to_string()));
    let params: Vec<(&str, &str)> = owned_params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

    with_retry(retry, || transport.query(ec2_base_url, "ec2", creds, &params)).await
}

/// `DescribeInstances` filtered by the `REQUEST_ID_TAG_KEY` tag, the
/// correlation mechanism DirectLaunch relies on since its resource id (a
/// reservation id) can't itself be queried back for instance detail.
pub async fn describe_instances_by_request_tag(
    transport: &EcAwsTransport,
    ec2_base_url: &str,
    creds: &AwsCredentials,
    retry: &RetryPolicy,
    request_id: &str,
) -> Result<String, ProviderError> {
    let filter_name = format!("tag:{REQUEST_ID_TAG_KEY}");
    let params = [
        ("Action", "DescribeInstances"),
        ("Version", "2016-11-15"),
        ("Filter.1.Name", filter_name.as_str()),
        ("Filter.1.Value.1", request_id),
    ];
    with_retry(retry, || transport.query(ec2_base_url, "ec2", creds, &params)).await
}
