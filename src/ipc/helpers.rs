use crate::ipc::error::err;
use rusqlite::ErrorCode;
use serde_json::json;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "not_found",
            message: message.into(),
            details: None,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "conflict",
            message: message.into(),
            details: None,
        }
    }
}

pub fn db_query_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

/// Writes can legitimately collide with another process attached to the same
/// workspace file; surface those as retryable conflicts.
pub fn db_update_err(e: rusqlite::Error) -> HandlerErr {
    let code = match &e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == ErrorCode::DatabaseBusy || f.code == ErrorCode::DatabaseLocked =>
        {
            "storage_conflict"
        }
        _ => "db_update_failed",
    };
    HandlerErr {
        code,
        message: e.to_string(),
        details: None,
    }
}

pub fn require_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(HandlerErr {
            code: "bad_params",
            message: format!("missing params.{}", key),
            details: None,
        }),
    }
}

pub fn opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn opt_i64(params: &serde_json::Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("params.{} must be an integer", key),
            details: Some(json!({ "value": v.clone() })),
        }),
    }
}

pub fn opt_bool(params: &serde_json::Value, key: &str) -> bool {
    params
        .get(key)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// Page/limit pagination with the defaults the UI expects.
pub fn pagination(
    params: &serde_json::Value,
    default_limit: i64,
) -> Result<(i64, i64), HandlerErr> {
    let page = opt_i64(params, "page")?.unwrap_or(1).max(1);
    let limit = opt_i64(params, "limit")?.unwrap_or(default_limit).clamp(1, 100);
    Ok((page, limit))
}
