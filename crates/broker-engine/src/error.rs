use thiserror::Error;

use broker_domain::DomainError;
use broker_provider::ProviderError;
use broker_store::StoreError;

/// Error taxonomy the lifecycle engine surfaces to its callers (§7).
///
/// Deliberately flatter than the boundary-layer taxonomy in §6: the engine
/// only needs enough structure for `broker-api` to map each variant onto a
/// stable `error_type` tag, not the full scheduler-facing vocabulary.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    /// Distinct from [`EngineError::Validation`]: a well-formed request that
    /// conflicts with a loaded template's constraints (over `max_number`),
    /// mapped to the boundary's `RequestValidationError` tag rather than
    /// `ValidationError` (§6, §8).
    #[error("request validation error: {0}")]
    RequestValidation(String),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("request not found: {0}")]
    RequestNotFound(String),

    #[error("machine not found: {0}")]
    MachineNotFound(String),

    #[error("machine {0} is not in a returnable state")]
    InvalidMachineState(String),

    #[error("request {request_id} timed out after {timeout_secs} seconds")]
    Timeout { request_id: String, timeout_secs: u32 },

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("internal engine error: {0}")]
    Internal(String),
}
