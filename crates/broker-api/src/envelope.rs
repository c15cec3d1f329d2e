use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

/// Scheduler-facing input envelope (§6). Every field optional: a given
/// operation reads only the field(s) relevant to it, the rest are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct InputEnvelope {
    pub template: Option<TemplateSelector>,
    pub requests: Option<Vec<RequestRef>>,
    pub machines: Option<Vec<MachineRef>>,
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub long: bool,
}

#[derive(Debug, Deserialize)]
pub struct TemplateSelector {
    #[serde(rename = "templateId")]
    pub template_id: String,
    #[serde(rename = "machineCount")]
    pub machine_count: u32,
}

#[derive(Debug, Deserialize)]
pub struct RequestRef {
    #[serde(rename = "requestId")]
    pub request_id: String,
}

#[derive(Debug, Deserialize)]
pub struct MachineRef {
    #[serde(rename = "machineId")]
    pub machine_id: String,
}

/// Wraps a successful payload with the `metadata` block every response
/// carries (§6).
pub fn success_envelope(correlation_id: &str, request_id: Option<&str>, payload: Value) -> Value {
    let mut body = match payload {
        Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            map.insert("result".to_string(), other);
            map
        }
    };
    body.insert(
        "metadata".to_string(),
        json!({
            "correlation_id": correlation_id,
            "timestamp": Utc::now().to_rfc3339(),
            "request_id": request_id,
        }),
    );
    Value::Object(body)
}

/// Builds the failure envelope: `{error, message, metadata: {correlation_id, error_type}}` (§6).
pub fn error_envelope(correlation_id: &str, error_type: &'static str, message: &str) -> Value {
    json!({
        "error": true,
        "message": message,
        "metadata": {
            "correlation_id": correlation_id,
            "error_type": error_type,
        },
    })
}
