use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::DomainError;
use crate::event::{AggregateType, Event, EventPayload};
use crate::ids::{MachineId, RequestId};
use crate::template::ProviderStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum MachineStatus {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
    Failed,
    Returned,
    Unknown,
}

impl MachineStatus {
    /// §4.4's machine state machine, including the `Unknown` recovery arcs.
    fn allowed_next(self) -> &'static [MachineStatus] {
        use MachineStatus::*;
        match self {
            Pending => &[Running, Failed],
            Running => &[Stopping, ShuttingDown],
            Stopping => &[Stopped, Failed],
            Stopped => &[Running, Terminated],
            ShuttingDown => &[Terminated],
            Terminated => &[Returned],
            Failed => &[],
            Returned => &[],
            Unknown => &[Pending, Running, Stopped, Terminated],
        }
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }
}

impl std::fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriceTier {
    OnDemand,
    Spot,
}

/// One recorded health check outcome for a check type, with append-only history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub details: serde_json::Value,
    pub history: Vec<HealthCheckEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckEntry {
    pub timestamp: DateTime<Utc>,
    pub healthy: bool,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub timestamp: DateTime<Utc>,
    pub old_status: MachineStatus,
    pub new_status: MachineStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub machine_id: MachineId,
    pub request_id: RequestId,
    pub name: String,
    pub status: MachineStatus,
    pub machine_type: String,
    pub private_ip: String,
    pub public_ip: Option<String>,
    pub provider_strategy: ProviderStrategy,
    pub resource_id: String,
    pub price_tier: PriceTier,
    pub launched_at: DateTime<Utc>,
    pub running_at: Option<DateTime<Utc>>,
    pub stopping_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub stopped_reason: Option<String>,
    pub terminated_at: Option<DateTime<Utc>>,
    pub terminated_reason: Option<String>,
    pub failed_at: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
    pub returned_at: Option<DateTime<Utc>>,
    pub return_id: Option<String>,
    pub tags: HashMap<String, String>,
    pub message: String,
    pub metadata: serde_json::Value,
    pub health_checks: HashMap<String, HealthCheck>,
    pub lifecycle_events: Vec<LifecycleEvent>,
    pub version: u64,
}

pub struct NewMachine {
    pub machine_id: MachineId,
    pub request_id: RequestId,
    pub name: String,
    pub machine_type: String,
    pub private_ip: String,
    pub public_ip: Option<String>,
    pub provider_strategy: ProviderStrategy,
    pub resource_id: String,
    pub price_tier: PriceTier,
    pub tags: HashMap<String, String>,
}

impl Machine {
    /// Factory constructor. Returns the aggregate together with its creation
    /// event.
    pub fn create(fields: NewMachine) -> (Machine, Event) {
        let machine = Machine {
            machine_id: fields.machine_id.clone(),
            request_id: fields.request_id,
            name: fields.name,
            status: MachineStatus::Pending,
            machine_type: fields.machine_type,
            private_ip: fields.private_ip,
            public_ip: fields.public_ip,
            provider_strategy: fields.provider_strategy,
            resource_id: fields.resource_id,
            price_tier: fields.price_tier,
            launched_at: Utc::now(),
            running_at: None,
            stopping_at: None,
            stopped_at: None,
            stopped_reason: None,
            terminated_at: None,
            terminated_reason: None,
            failed_at: None,
            failed_reason: None,
            returned_at: None,
            return_id: None,
            tags: fields.tags,
            message: String::new(),
            metadata: serde_json::Value::Null,
            health_checks: HashMap::new(),
            lifecycle_events: Vec::new(),
            version: 0,
        };
        let event = Event::new(
            AggregateType::Machine,
            machine.machine_id.as_str(),
            0,
            EventPayload::ResourceCreated {
                details: serde_json::to_value(&machine).unwrap_or(serde_json::Value::Null),
            },
        );
        (machine, event)
    }

    /// Drives the machine state machine (§4.4). Mutates in place and returns
    /// the resulting `MachineStatusChanged` event for the unit-of-work to
    /// collect; never mutates and fails partway.
    pub fn transition(
        &mut self,
        new_status: MachineStatus,
        reason: Option<String>,
    ) -> Result<Event, DomainError> {
        if self.status == new_status {
            return Err(DomainError::InvalidMachineStateTransition {
                machine_id: self.machine_id.to_string(),
                from: self.status.to_string(),
                to: new_status.to_string(),
            });
        }
        if !self.status.allowed_next().contains(&new_status) {
            return Err(DomainError::InvalidMachineStateTransition {
                machine_id: self.machine_id.to_string(),
                from: self.status.to_string(),
                to: new_status.to_string(),
            });
        }

        let old_status = self.status;
        let now = Utc::now();
        self.status = new_status;
        if let Some(r) = &reason {
            self.message = r.clone();
        }

        match new_status {
            MachineStatus::Running => self.running_at = Some(now),
            MachineStatus::Stopping => self.stopping_at = Some(now),
            MachineStatus::Stopped => {
                self.stopped_at = Some(now);
                self.stopped_reason = reason.clone();
            }
            MachineStatus::Terminated => {
                self.terminated_at = Some(now);
                self.terminated_reason = reason.clone();
            }
            MachineStatus::Failed => {
                self.failed_at = Some(now);
                self.failed_reason = reason.clone();
            }
            MachineStatus::Returned => {
                self.returned_at = Some(now);
            }
            _ => {}
        }

        self.lifecycle_events.push(LifecycleEvent {
            timestamp: now,
            old_status,
            new_status,
            reason: reason.clone(),
        });
        self.version += 1;

        Ok(Event::new(
            AggregateType::Machine,
            self.machine_id.as_str(),
            self.version,
            EventPayload::MachineStatusChanged {
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
                reason,
                request_id: self.request_id.to_string(),
            },
        ))
    }

    /// Marks the machine returned, recording the originating return request id.
    pub fn mark_returned(&mut self, return_id: impl Into<String>) -> Result<Event, DomainError> {
        self.return_id = Some(return_id.into());
        self.transition(MachineStatus::Returned, Some("returned to provider".into()))
    }

    pub fn record_health_check(
        &mut self,
        check_type: impl Into<String>,
        healthy: bool,
        details: serde_json::Value,
    ) -> Event {
        let check_type = check_type.into();
        let now = Utc::now();
        let entry = HealthCheckEntry {
            timestamp: now,
            healthy,
            details: details.clone(),
        };
        let check = self.health_checks.entry(check_type.clone()).or_default();
        check.healthy = healthy;
        check.last_check = Some(now);
        check.details = details.clone();
        check.history.push(entry);
        self.version += 1;

        Event::new(
            AggregateType::Machine,
            self.machine_id.as_str(),
            self.version,
            EventPayload::MachineHealthCheckRecorded {
                check_type,
                healthy,
                details,
            },
        )
    }

    pub fn is_running(&self) -> bool {
        self.status == MachineStatus::Running
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, MachineStatus::Failed | MachineStatus::Terminated)
    }

    pub fn is_healthy(&self) -> bool {
        !self.health_checks.is_empty() && self.health_checks.values().all(|c| c.healthy)
    }

    /// `result` field for the scheduler-facing status report (§6).
    pub fn result(&self) -> &'static str {
        match self.status {
            MachineStatus::Running => "succeed",
            MachineStatus::Failed | MachineStatus::Terminated => "fail",
            _ => "executing",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> Machine {
        let (m, _) = Machine::create(NewMachine {
            machine_id: MachineId::new("i-0abc123").unwrap(),
            request_id: RequestId::generate(crate::request::RequestType::Acquire),
            name: "ip-10-0-0-1".into(),
            machine_type: "m5.large".into(),
            private_ip: "10.0.0.1".into(),
            public_ip: None,
            provider_strategy: ProviderStrategy::DirectLaunch,
            resource_id: "r-1".into(),
            price_tier: PriceTier::OnDemand,
            tags: HashMap::new(),
        });
        m
    }

    #[test]
    fn happy_path_transitions() {
        let mut m = machine();
        assert!(m.transition(MachineStatus::Running, None).is_ok());
        assert!(m.is_running());
        assert_eq!(m.result(), "succeed");
        assert!(m.transition(MachineStatus::Stopping, None).is_ok());
        assert!(m.transition(MachineStatus::Stopped, Some("maintenance".into())).is_ok());
        assert_eq!(m.stopped_reason.as_deref(), Some("maintenance"));
    }

    #[test]
    fn rejects_transition_from_terminal_state() {
        let mut m = machine();
        m.transition(MachineStatus::Failed, Some("boom".into())).unwrap();
        assert!(m.status.is_terminal());
        assert!(m.transition(MachineStatus::Running, None).is_err());
    }

    #[test]
    fn unknown_recovers_into_known_states() {
        let mut m = machine();
        m.status = MachineStatus::Unknown;
        assert!(m.transition(MachineStatus::Stopped, None).is_ok());
    }

    #[test]
    fn health_check_history_is_append_only() {
        let mut m = machine();
        m.record_health_check("instance-status", true, serde_json::json!({}));
        m.record_health_check("instance-status", false, serde_json::json!({"detail": "x"}));
        let check = m.health_checks.get("instance-status").unwrap();
        assert_eq!(check.history.len(), 2);
        assert!(!check.healthy);
        assert!(!m.is_healthy());
    }
}
