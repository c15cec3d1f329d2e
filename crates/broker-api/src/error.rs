use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use broker_domain::DomainError;
use broker_engine::EngineError;
use broker_provider::ProviderError;
use broker_store::StoreError;

use crate::envelope::error_envelope;

/// Boundary error carrying the stable `error_type` tag from the scheduler
/// envelope's vocabulary (§6), alongside an HTTP status for server mode.
pub struct ApiError {
    pub status: StatusCode,
    pub error_type: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, error_type: &'static str, message: impl Into<String>) -> Self {
        ApiError { status, error_type, message: message.into() }
    }

    pub fn rate_limit_exceeded() -> Self {
        ApiError::new(StatusCode::TOO_MANY_REQUESTS, "RateLimitExceeded", "rate limit exceeded")
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match &e {
            EngineError::Validation(_) => ApiError::new(StatusCode::BAD_REQUEST, "ValidationError", e.to_string()),
            EngineError::RequestValidation(_) => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "RequestValidationError", e.to_string())
            }
            EngineError::TemplateNotFound(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "TemplateNotFoundError", e.to_string())
            }
            EngineError::RequestNotFound(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "RequestNotFoundError", e.to_string())
            }
            EngineError::MachineNotFound(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "MachineNotFoundError", e.to_string())
            }
            EngineError::InvalidMachineState(_) => {
                ApiError::new(StatusCode::CONFLICT, "InvalidMachineStateError", e.to_string())
            }
            EngineError::Timeout { .. } => {
                ApiError::new(StatusCode::CONFLICT, "InvalidRequestStateError", e.to_string())
            }
            EngineError::Domain(domain_err) => domain_err_to_api(domain_err, &e.to_string()),
            EngineError::Store(_) => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "InfrastructureError", e.to_string())
            }
            EngineError::Provider(provider_err) => provider_err_to_api(provider_err, &e.to_string()),
            EngineError::Internal(_) => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", e.to_string()),
        }
    }
}

fn domain_err_to_api(e: &DomainError, message: &str) -> ApiError {
    match e {
        DomainError::InvalidTemplateId(_) | DomainError::InvalidRequestId(_) | DomainError::InvalidMachineId(_) => {
            ApiError::new(StatusCode::BAD_REQUEST, "ValidationError", message)
        }
        DomainError::InvalidTemplate(_) => ApiError::new(StatusCode::BAD_REQUEST, "ValidationError", message),
        DomainError::InvalidRequestStateTransition { .. } => {
            ApiError::new(StatusCode::CONFLICT, "InvalidRequestStateError", message)
        }
        DomainError::InvalidMachineStateTransition { .. } => {
            ApiError::new(StatusCode::CONFLICT, "InvalidMachineStateError", message)
        }
        DomainError::MachineAllocationExceeded { .. } => {
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", message)
        }
    }
}

fn provider_err_to_api(e: &ProviderError, message: &str) -> ApiError {
    match e {
        ProviderError::ResourceNotFound(_) => ApiError::new(StatusCode::NOT_FOUND, "ResourceNotFoundError", message),
        _ => ApiError::new(StatusCode::BAD_GATEWAY, "InfrastructureError", message),
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "InfrastructureError", e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let body = error_envelope(&correlation_id, self.error_type, &self.message);
        (self.status, Json(body)).into_response()
    }
}
