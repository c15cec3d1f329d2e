use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The aggregate kind an [`Event`] describes. Kept as a flat string tag rather
/// than an owning back-reference to the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AggregateType {
    Template,
    Request,
    Machine,
}

/// Closed set of event payloads. The source's event hierarchy mixes in
/// overlapping timestamp/reason/status fields across several base classes;
/// here each variant carries its own flat fields instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum EventPayload {
    ResourceCreated {
        details: serde_json::Value,
    },
    RequestStatusChanged {
        old_status: String,
        new_status: String,
        message: Option<String>,
        machine_count: u32,
    },
    MachineStatusChanged {
        old_status: String,
        new_status: String,
        reason: Option<String>,
        request_id: String,
    },
    MachineHealthCheckRecorded {
        check_type: String,
        healthy: bool,
        details: serde_json::Value,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventPayload::ResourceCreated { .. } => "ResourceCreated",
            EventPayload::RequestStatusChanged { .. } => "RequestStatusChanged",
            EventPayload::MachineStatusChanged { .. } => "MachineStatusChanged",
            EventPayload::MachineHealthCheckRecorded { .. } => "MachineHealthCheckRecorded",
        }
    }
}

/// Immutable record of a domain transition, produced during aggregate
/// mutation and collected by the unit-of-work for dispatch at commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub aggregate_type: AggregateType,
    pub aggregate_id: String,
    pub version: u64,
    pub payload: EventPayload,
    pub metadata: HashMap<String, String>,
}

impl Event {
    pub fn new(
        aggregate_type: AggregateType,
        aggregate_id: impl Into<String>,
        version: u64,
        payload: EventPayload,
    ) -> Self {
        Event {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            aggregate_type,
            aggregate_id: aggregate_id.into(),
            version,
            payload,
            metadata: HashMap::new(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_matches_payload_variant() {
        let event = Event::new(
            AggregateType::Machine,
            "i-0abc",
            1,
            EventPayload::MachineStatusChanged {
                old_status: "Pending".into(),
                new_status: "Running".into(),
                reason: None,
                request_id: "req-1".into(),
            },
        );
        assert_eq!(event.event_type(), "MachineStatusChanged");
    }

    #[test]
    fn round_trips_through_json() {
        let event = Event::new(
            AggregateType::Request,
            "req-1",
            0,
            EventPayload::ResourceCreated {
                details: serde_json::json!({"requestId": "req-1"}),
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
