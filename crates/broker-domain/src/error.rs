use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid template id: {0}")]
    InvalidTemplateId(String),

    #[error("invalid request id: {0}")]
    InvalidRequestId(String),

    #[error("invalid machine id: {0}")]
    InvalidMachineId(String),

    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    #[error("request {request_id} cannot transition from {from} to {to}")]
    InvalidRequestStateTransition {
        request_id: String,
        from: String,
        to: String,
    },

    #[error("machine {machine_id} cannot transition from {from} to {to}")]
    InvalidMachineStateTransition {
        machine_id: String,
        from: String,
        to: String,
    },

    #[error("request {request_id} already has {requested_count} machines")]
    MachineAllocationExceeded {
        request_id: String,
        requested_count: u32,
    },
}
