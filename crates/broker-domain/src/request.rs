use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::{AggregateType, Event, EventPayload};
use crate::ids::{MachineId, RequestId, TemplateId};
use crate::machine::Machine;
use crate::template::ProviderStrategy;

pub const DEFAULT_TIMEOUT_SECS: u32 = 3600;
pub const MAX_TIMEOUT_SECS: u32 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RequestType {
    Acquire,
    Return,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RequestStatus {
    Pending,
    Creating,
    Running,
    Complete,
    CompleteWithError,
    Failed,
}

impl RequestStatus {
    /// §4.3's state diagram, with `Creating` as the intermediate state
    /// between `Pending` and `Running`.
    fn allowed_next(self) -> &'static [RequestStatus] {
        use RequestStatus::*;
        match self {
            Pending => &[Creating, Failed],
            Creating => &[Running, Failed],
            Running => &[Complete, CompleteWithError, Failed],
            Complete | CompleteWithError | Failed => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }

    pub fn is_active(self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::Creating | RequestStatus::Running)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub request_id: RequestId,
    pub request_type: RequestType,
    pub template_id: Option<TemplateId>,
    pub requested_count: u32,
    pub provider_strategy: Option<ProviderStrategy>,
    pub status: RequestStatus,
    pub message: String,
    pub machines: Vec<Machine>,
    /// Machine ids borrowed (not owned) by a Return request for termination.
    pub returning_machine_ids: Vec<MachineId>,
    pub created_at: DateTime<Utc>,
    pub first_observation_at: Option<DateTime<Utc>>,
    pub last_observation_at: Option<DateTime<Utc>>,
    pub correlation_id: String,
    pub timeout_secs: u32,
    pub resource_id: Option<String>,
    pub launch_template_id: Option<String>,
    pub launch_template_version: Option<String>,
    pub tags: HashMap<String, String>,
    pub metadata: serde_json::Value,
    pub version: u64,
}

impl Request {
    pub fn create_acquire(
        template_id: TemplateId,
        requested_count: u32,
        provider_strategy: ProviderStrategy,
        timeout_secs: Option<u32>,
        tags: HashMap<String, String>,
        metadata: serde_json::Value,
    ) -> (Request, Event) {
        let request_id = RequestId::generate(RequestType::Acquire);
        let timeout = timeout_secs
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .min(MAX_TIMEOUT_SECS);
        let request = Request {
            request_id,
            request_type: RequestType::Acquire,
            template_id: Some(template_id),
            requested_count,
            provider_strategy: Some(provider_strategy),
            status: RequestStatus::Pending,
            message: String::new(),
            machines: Vec::new(),
            returning_machine_ids: Vec::new(),
            created_at: Utc::now(),
            first_observation_at: None,
            last_observation_at: None,
            correlation_id: Uuid::new_v4().to_string(),
            timeout_secs: timeout,
            resource_id: None,
            launch_template_id: None,
            launch_template_version: None,
            tags,
            metadata,
            version: 0,
        };
        let event = request.creation_event();
        (request, event)
    }

    pub fn create_return(machine_ids: Vec<MachineId>) -> (Request, Event) {
        let request_id = RequestId::generate(RequestType::Return);
        let request = Request {
            request_id,
            request_type: RequestType::Return,
            template_id: None,
            requested_count: machine_ids.len() as u32,
            provider_strategy: None,
            status: RequestStatus::Pending,
            message: String::new(),
            machines: Vec::new(),
            returning_machine_ids: machine_ids,
            created_at: Utc::now(),
            first_observation_at: None,
            last_observation_at: None,
            correlation_id: Uuid::new_v4().to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            resource_id: None,
            launch_template_id: None,
            launch_template_version: None,
            tags: HashMap::new(),
            metadata: serde_json::Value::Null,
            version: 0,
        };
        let event = request.creation_event();
        (request, event)
    }

    fn creation_event(&self) -> Event {
        Event::new(
            AggregateType::Request,
            self.request_id.as_str(),
            0,
            EventPayload::ResourceCreated {
                details: serde_json::to_value(self).unwrap_or(serde_json::Value::Null),
            },
        )
    }

    /// Drives the request state machine (§4.3). Stamps the terminal reason as
    /// `message` when provided.
    pub fn transition(
        &mut self,
        new_status: RequestStatus,
        message: Option<String>,
    ) -> Result<Event, DomainError> {
        if self.status == new_status {
            return Err(DomainError::InvalidRequestStateTransition {
                request_id: self.request_id.to_string(),
                from: self.status.to_string(),
                to: new_status.to_string(),
            });
        }
        if !self.status.allowed_next().contains(&new_status) {
            return Err(DomainError::InvalidRequestStateTransition {
                request_id: self.request_id.to_string(),
                from: self.status.to_string(),
                to: new_status.to_string(),
            });
        }

        let old_status = self.status;
        self.status = new_status;
        if let Some(m) = &message {
            self.message = m.clone();
        }
        self.version += 1;

        Ok(Event::new(
            AggregateType::Request,
            self.request_id.as_str(),
            self.version,
            EventPayload::RequestStatusChanged {
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
                message,
                machine_count: self.machines.len() as u32,
            },
        ))
    }

    /// Stamps `first_observation_at` at most once and `last_observation_at`
    /// on every call, per §4.3's "first-observation tracking" rule.
    pub fn record_observation(&mut self) {
        let now = Utc::now();
        if self.first_observation_at.is_none() {
            self.first_observation_at = Some(now);
        }
        self.last_observation_at = Some(now);
    }

    pub fn has_timed_out(&self) -> bool {
        match self.first_observation_at {
            None => false,
            Some(first) => {
                let elapsed = Utc::now().signed_duration_since(first);
                elapsed.num_seconds() > self.timeout_secs as i64
            }
        }
    }

    /// Appends a newly-discovered Machine to this request. Invariant:
    /// `len(machines) <= requested_count`.
    pub fn add_machine(&mut self, machine: Machine) -> Result<(), DomainError> {
        if self.machines.len() as u32 >= self.requested_count {
            return Err(DomainError::MachineAllocationExceeded {
                request_id: self.request_id.to_string(),
                requested_count: self.requested_count,
            });
        }
        self.machines.push(machine);
        Ok(())
    }

    pub fn has_machine(&self, machine_id: &MachineId) -> bool {
        self.machines.iter().any(|m| &m.machine_id == machine_id)
    }

    /// Recomputes status from the current machine population (§4.3 step 4 of
    /// status reconciliation). Returns the emitted event, if the population
    /// changed the status.
    pub fn recompute_status_from_machines(&mut self) -> Result<Option<Event>, DomainError> {
        if self.machines.is_empty() {
            return Ok(None);
        }
        let all_known = self.machines.len() as u32 == self.requested_count;
        let failed_count = self.machines.iter().filter(|m| m.is_failed()).count();
        let running_count = self.machines.iter().filter(|m| m.is_running()).count();

        if !all_known {
            return Ok(None);
        }
        if failed_count > 0 {
            let event = self.transition(
                RequestStatus::CompleteWithError,
                Some(format!("{failed_count} machines failed to provision")),
            )?;
            return Ok(Some(event));
        }
        if running_count as u32 == self.requested_count {
            let event = self.transition(
                RequestStatus::Complete,
                Some("all machines provisioned successfully".into()),
            )?;
            return Ok(Some(event));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{MachineStatus, NewMachine, PriceTier};
    use std::collections::HashMap as Map;

    fn acquire_request(count: u32) -> Request {
        let (req, _) = Request::create_acquire(
            TemplateId::new("t1").unwrap(),
            count,
            ProviderStrategy::DirectLaunch,
            None,
            Map::new(),
            serde_json::Value::Null,
        );
        req
    }

    fn running_machine(req_id: RequestId, id: &str) -> Machine {
        let (mut m, _) = Machine::create(NewMachine {
            machine_id: MachineId::new(id).unwrap(),
            request_id: req_id,
            name: id.into(),
            machine_type: "m5.large".into(),
            private_ip: "10.0.0.1".into(),
            public_ip: None,
            provider_strategy: ProviderStrategy::DirectLaunch,
            resource_id: "r-1".into(),
            price_tier: PriceTier::OnDemand,
            tags: Map::new(),
        });
        m.transition(MachineStatus::Running, None).unwrap();
        m
    }

    #[test]
    fn creating_is_a_valid_intermediate_state() {
        let mut req = acquire_request(2);
        assert!(req.transition(RequestStatus::Creating, None).is_ok());
        assert!(req.transition(RequestStatus::Running, None).is_ok());
    }

    #[test]
    fn add_machine_enforces_requested_count() {
        let mut req = acquire_request(1);
        req.transition(RequestStatus::Creating, None).unwrap();
        req.transition(RequestStatus::Running, None).unwrap();
        req.add_machine(running_machine(req.request_id.clone(), "i-aaa0000"))
            .unwrap();
        let err = req
            .add_machine(running_machine(req.request_id.clone(), "i-bbb0000"))
            .unwrap_err();
        assert!(matches!(err, DomainError::MachineAllocationExceeded { .. }));
    }

    #[test]
    fn recompute_status_marks_complete_when_all_running() {
        let mut req = acquire_request(2);
        req.transition(RequestStatus::Creating, None).unwrap();
        req.transition(RequestStatus::Running, None).unwrap();
        req.add_machine(running_machine(req.request_id.clone(), "i-aaa0000"))
            .unwrap();
        req.add_machine(running_machine(req.request_id.clone(), "i-bbb0000"))
            .unwrap();
        let event = req.recompute_status_from_machines().unwrap();
        assert!(event.is_some());
        assert_eq!(req.status, RequestStatus::Complete);
    }

    #[test]
    fn terminal_status_rejects_further_transition() {
        let mut req = acquire_request(1);
        req.transition(RequestStatus::Creating, None).unwrap();
        req.transition(RequestStatus::Running, None).unwrap();
        req.transition(RequestStatus::Failed, Some("boom".into())).unwrap();
        assert!(req.transition(RequestStatus::Running, None).is_err());
    }

    #[test]
    fn first_observation_stamped_once() {
        let mut req = acquire_request(1);
        req.record_observation();
        let first = req.first_observation_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        req.record_observation();
        assert_eq!(req.first_observation_at, first);
        assert!(req.last_observation_at.unwrap() >= first.unwrap());
    }
}
