use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use uuid::Uuid;

use crate::envelope::{success_envelope, InputEnvelope};
use crate::error::ApiError;
use crate::state::AppState;

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `GET /templates` — `getAvailableTemplates` (§6).
pub async fn get_available_templates(
    State(state): State<AppState>,
    Json(input): Json<InputEnvelope>,
) -> Result<impl IntoResponse, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let payload = state.broker.list_templates(input.long).await?;
    Ok(Json(success_envelope(&correlation_id, None, payload)))
}

/// `POST /machines` — `requestMachines` (§6).
pub async fn request_machines(
    State(state): State<AppState>,
    Json(input): Json<InputEnvelope>,
) -> Result<impl IntoResponse, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let template = input.template.ok_or_else(|| {
        ApiError::new(axum::http::StatusCode::BAD_REQUEST, "ValidationError", "missing 'template' field")
    })?;

    if template.machine_count == 0 {
        return Err(ApiError::new(
            axum::http::StatusCode::BAD_REQUEST,
            "ValidationError",
            "machineCount must be greater than zero",
        ));
    }

    let payload = state
        .broker
        .request_machines(&template.template_id, template.machine_count, Default::default(), serde_json::Value::Null)
        .await?;
    let request_id = payload.get("requestId").and_then(|v| v.as_str());
    Ok(Json(success_envelope(&correlation_id, request_id, payload)))
}

/// `POST /machines/return` — `requestReturnMachines` (§6).
pub async fn request_return_machines(
    State(state): State<AppState>,
    Json(input): Json<InputEnvelope>,
) -> Result<impl IntoResponse, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let machine_ids = input
        .machines
        .unwrap_or_default()
        .into_iter()
        .map(|m| m.machine_id)
        .collect();

    let payload = state.broker.request_return_machines(machine_ids, input.all).await?;
    let request_id = payload.get("requestId").and_then(|v| v.as_str());
    Ok(Json(success_envelope(&correlation_id, request_id, payload)))
}

/// `POST /requests/status` — `getRequestStatus` (§6).
pub async fn get_request_status(
    State(state): State<AppState>,
    Json(input): Json<InputEnvelope>,
) -> Result<impl IntoResponse, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let request_ids = input.requests.unwrap_or_default().into_iter().map(|r| r.request_id).collect();

    let payload = state.broker.get_request_status(request_ids, input.all).await?;
    Ok(Json(success_envelope(&correlation_id, None, payload)))
}

/// `GET /requests/returns` — `getReturnRequests` (§6).
pub async fn get_return_requests(
    State(state): State<AppState>,
    Json(input): Json<InputEnvelope>,
) -> Result<impl IntoResponse, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let payload = state.broker.get_return_requests(input.long).await?;
    Ok(Json(success_envelope(&correlation_id, None, payload)))
}
