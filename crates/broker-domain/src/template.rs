use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::DomainError;
use crate::ids::TemplateId;

/// Provider-side acquisition strategy a [`Template`] binds to. Closed set,
/// dispatched on by the handler registry (see `broker-provider`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProviderStrategy {
    InstantFleet,
    ManagedFleet,
    AutoScalingGroup,
    DirectLaunch,
    SpotFleet,
}

impl std::fmt::Display for ProviderStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderStrategy::InstantFleet => "InstantFleet",
            ProviderStrategy::ManagedFleet => "ManagedFleet",
            ProviderStrategy::AutoScalingGroup => "AutoScalingGroup",
            ProviderStrategy::DirectLaunch => "DirectLaunch",
            ProviderStrategy::SpotFleet => "SpotFleet",
        };
        write!(f, "{s}")
    }
}

impl ProviderStrategy {
    pub fn requires_spot_role(&self) -> bool {
        matches!(self, ProviderStrategy::SpotFleet)
    }
}

/// A direct image id (`ami-...`) or an alias resolved at read time by the
/// template store (e.g. an SSM parameter path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageReference {
    Direct(String),
    Alias(String),
}

/// Exactly one of a single subnet or a set of candidate subnets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkPlacement {
    SingleSubnet(String),
    SubnetSet(Vec<String>),
}

/// Exactly one of a single instance type or a weighted map of candidate types
/// (used by fleet/ASG mixed-instance-policy strategies).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineTypeSpec {
    Single(String),
    Weighted(HashMap<String, f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub template_id: TemplateId,
    pub provider_strategy: ProviderStrategy,
    pub max_number: u32,
    pub image: ImageReference,
    pub network: NetworkPlacement,
    pub machine_type: MachineTypeSpec,
    pub security_group_ids: Vec<String>,
    pub key_name: Option<String>,
    pub user_data: Option<String>,
    pub spot_role: Option<String>,
    pub max_price: Option<f64>,
    pub allocation_strategy: Option<String>,
}

pub struct TemplateFields {
    pub template_id: TemplateId,
    pub provider_strategy: ProviderStrategy,
    pub max_number: u32,
    pub image: ImageReference,
    pub network: NetworkPlacement,
    pub machine_type: MachineTypeSpec,
    pub security_group_ids: Vec<String>,
    pub key_name: Option<String>,
    pub user_data: Option<String>,
    pub spot_role: Option<String>,
    pub max_price: Option<f64>,
    pub allocation_strategy: Option<String>,
}

impl Template {
    /// Validates field invariants and constructs the template.
    pub fn new(fields: TemplateFields) -> Result<Self, DomainError> {
        if fields.max_number == 0 {
            return Err(DomainError::InvalidTemplate(
                "max_number must be strictly positive".into(),
            ));
        }
        if let MachineTypeSpec::Weighted(weights) = &fields.machine_type {
            if weights.is_empty() {
                return Err(DomainError::InvalidTemplate(
                    "weighted machine type map must not be empty".into(),
                ));
            }
            if weights.values().any(|w| *w <= 0.0) {
                return Err(DomainError::InvalidTemplate(
                    "all machine type weights must be strictly positive".into(),
                ));
            }
        }
        if let NetworkPlacement::SubnetSet(subnets) = &fields.network {
            if subnets.is_empty() {
                return Err(DomainError::InvalidTemplate(
                    "subnet set must not be empty".into(),
                ));
            }
        }
        if fields.provider_strategy.requires_spot_role() && fields.spot_role.is_none() {
            return Err(DomainError::InvalidTemplate(format!(
                "{} requires a spot_role reference",
                fields.provider_strategy
            )));
        }

        Ok(Template {
            template_id: fields.template_id,
            provider_strategy: fields.provider_strategy,
            max_number: fields.max_number,
            image: fields.image,
            network: fields.network,
            machine_type: fields.machine_type,
            security_group_ids: fields.security_group_ids,
            key_name: fields.key_name,
            user_data: fields.user_data,
            spot_role: fields.spot_role,
            max_price: fields.max_price,
            allocation_strategy: fields.allocation_strategy,
        })
    }

    /// Canonical SHA-256 hash of the template's fields, used by the template
    /// store's idempotent-reload diagnostic — not a persistence key.
    pub fn content_hash(&self) -> String {
        use sha2::{Digest, Sha256};
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_fields(strategy: ProviderStrategy) -> TemplateFields {
        TemplateFields {
            template_id: TemplateId::new("t1").unwrap(),
            provider_strategy: strategy,
            max_number: 4,
            image: ImageReference::Direct("ami-0123".into()),
            network: NetworkPlacement::SingleSubnet("subnet-1".into()),
            machine_type: MachineTypeSpec::Single("m5.large".into()),
            security_group_ids: vec!["sg-1".into()],
            key_name: None,
            user_data: None,
            spot_role: None,
            max_price: None,
            allocation_strategy: None,
        }
    }

    #[test]
    fn rejects_zero_max_number() {
        let mut fields = base_fields(ProviderStrategy::DirectLaunch);
        fields.max_number = 0;
        assert!(Template::new(fields).is_err());
    }

    #[test]
    fn spot_fleet_requires_role() {
        let fields = base_fields(ProviderStrategy::SpotFleet);
        assert!(Template::new(fields).is_err());

        let mut fields = base_fields(ProviderStrategy::SpotFleet);
        fields.spot_role = Some("arn:aws:iam::123:role/spot-fleet".into());
        assert!(Template::new(fields).is_ok());
    }

    #[test]
    fn rejects_non_positive_weights() {
        let mut fields = base_fields(ProviderStrategy::ManagedFleet);
        let mut weights = HashMap::new();
        weights.insert("m5.large".to_string(), 0.0);
        fields.machine_type = MachineTypeSpec::Weighted(weights);
        assert!(Template::new(fields).is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let fields = base_fields(ProviderStrategy::InstantFleet);
        let template = Template::new(fields).unwrap();
        let json = serde_json::to_string(&template).unwrap();
        let back: Template = serde_json::from_str(&json).unwrap();
        assert_eq!(template, back);
    }
}
