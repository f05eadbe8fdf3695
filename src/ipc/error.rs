use crate::store::StoreError;
use serde_json::json;

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

/// Map a store error onto an IPC error; `fallback` is the code for database failures.
pub fn store_err(id: &str, fallback: &str, e: &StoreError) -> serde_json::Value {
    match e {
        StoreError::InvalidInput(m) => err(id, "bad_params", m.clone(), None),
        StoreError::NotFound(m) => err(id, "not_found", m.clone(), None),
        StoreError::Sqlite(_) | StoreError::Json(_) => err(id, fallback, e.to_string(), None),
    }
}
