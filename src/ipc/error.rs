use crate::error::CoreError;
use serde_json::json;
use tracing::{debug, error};

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Maps an engine error onto the wire envelope.
pub fn core_err(id: &str, e: &CoreError) -> serde_json::Value {
    let mut details = e.details();
    if e.is_retryable() {
        error!(request_id = id, error = %e, "storage failure");
        let d = details.get_or_insert_with(|| json!({}));
        d["retryable"] = json!(true);
    } else {
        debug!(request_id = id, code = e.code(), error = %e, "request rejected");
    }
    err(id, e.code(), e.to_string(), details)
}

pub fn settings_err(id: &str, e: anyhow::Error) -> serde_json::Value {
    error!(request_id = id, error = %e, "settings unavailable");
    err(id, "db_error", e.to_string(), Some(json!({ "retryable": true })))
}
