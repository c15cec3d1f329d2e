use thiserror::Error;

/// Terminal classification a retry-exhausted provider call is reclassified
/// into (§4.6, §7). Transient errors never surface past `with_retry`; only
/// these variants reach the engine.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("insufficient capacity: {0}")]
    Capacity(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("iam error: {0}")]
    Iam(String),

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal provider error: {0}")]
    Internal(String),

    #[error("no handler registered for provider strategy '{0}'")]
    HandlerNotConfigured(String),
}

impl ProviderError {
    /// Classifies a raw AWS error code (from an EC2/ASG Query-API error
    /// response) into the taxonomy above. Unknown codes fall back to
    /// `Internal` so retry exhaustion never panics on an unexpected code.
    pub fn classify(code: &str, message: &str) -> Self {
        match code {
            "InsufficientInstanceCapacity" | "InsufficientHostCapacity" | "MaxSpotInstanceCountExceeded" => {
                ProviderError::Capacity(message.to_string())
            }
            "RequestLimitExceeded" | "Throttling" | "ThrottlingException" => {
                ProviderError::Quota(message.to_string())
            }
            "UnauthorizedOperation" | "AuthFailure" | "AccessDenied" => {
                ProviderError::Iam(message.to_string())
            }
            "InvalidInstanceID.NotFound" | "InvalidLaunchTemplateId.NotFound"
            | "InvalidAutoScalingGroupName.NotFound" | "InvalidFleetId.NotFound"
            | "InvalidSpotFleetRequestId.NotFound" => ProviderError::ResourceNotFound(message.to_string()),
            "InvalidParameterValue" | "ValidationError" | "MissingParameter" => {
                ProviderError::Validation(message.to_string())
            }
            _ => ProviderError::Internal(format!("{code}: {message}")),
        }
    }

    /// Whitelist of transient AWS error codes worth retrying (§4.6).
    pub fn is_transient_code(code: &str) -> bool {
        matches!(
            code,
            "RequestLimitExceeded"
                | "Throttling"
                | "ThrottlingException"
                | "InternalError"
                | "InternalFailure"
                | "ServiceUnavailable"
                | "RequestTimeout"
        )
    }
}
