//! Pure validation of decoded JSON-RPC messages.
//!
//! Operates on `serde_json::Value` so every envelope defect gets its own
//! message naming the first offending field or index; never mutates input,
//! never performs I/O. The dispatcher maps failures to the wire code.

use serde_json::Value;
use thiserror::Error;

use crate::protocol::JSONRPC_VERSION;

/// A structured validation failure carrying a human-readable reason.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

fn fail(reason: impl Into<String>) -> Result<(), ValidationError> {
    Err(ValidationError(reason.into()))
}

/// Validate a decoded message against the JSON-RPC 2.0 envelope and the
/// method-specific parameter schema.
pub fn validate_request(msg: &Value) -> Result<(), ValidationError> {
    if msg.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return fail("Invalid JSON-RPC version. Expected \"2.0\"");
    }

    let method = match msg.get("method").and_then(Value::as_str) {
        Some(m) if !m.is_empty() => m,
        _ => return fail("Missing or invalid \"method\" field"),
    };

    // Both supported methods are request-type calls; an absent or null id
    // would leave the eventual response unattributable.
    if msg.get("id").map_or(true, Value::is_null) {
        return fail("Missing \"id\" field");
    }

    match method {
        "triggerPopup" => validate_trigger_popup_params(msg.get("params")),
        "healthCheck" => Ok(()),
        other => fail(format!("Unknown method: {other}")),
    }
}

/// Validate parameters for the `triggerPopup` method.
fn validate_trigger_popup_params(params: Option<&Value>) -> Result<(), ValidationError> {
    let params = match params {
        Some(p) if p.is_object() => p,
        _ => return fail("Missing or invalid \"params\" object"),
    };

    for field in ["workspacePath", "title", "message"] {
        match params.get(field).and_then(Value::as_str) {
            Some(s) if !s.is_empty() => {}
            _ => return fail(format!("Missing or invalid \"{field}\" parameter")),
        }
    }

    let options = match params.get("options").and_then(Value::as_array) {
        Some(o) => o,
        None => return fail("Missing or invalid \"options\" parameter (must be array)"),
    };

    if options.is_empty() {
        return fail("At least one option is required");
    }

    for (i, option) in options.iter().enumerate() {
        if !option.is_object() {
            return fail(format!("Invalid option at index {i} (must be object)"));
        }
        for field in ["label", "value"] {
            match option.get(field).and_then(Value::as_str) {
                Some(s) if !s.is_empty() => {}
                _ => {
                    return fail(format!(
                        "Invalid option at index {i}: missing or invalid \"{field}\""
                    ))
                }
            }
        }
    }

    Ok(())
}

/// Validate a request origin (HTTP transport metadata, egress allow-list).
///
/// Absent origins are allowed (non-browser tooling sends none); empty-string
/// origins are rejected; everything else must be a local origin.
pub fn validate_origin(origin: Option<&str>) -> bool {
    let origin = match origin {
        None => return true,
        Some(o) => o,
    };

    if origin.is_empty() {
        return false;
    }

    const ALLOWED_PREFIXES: [&str; 4] = [
        "http://localhost",
        "http://127.0.0.1",
        "https://localhost",
        "https://127.0.0.1",
    ];

    ALLOWED_PREFIXES
        .iter()
        .any(|allowed| origin.starts_with(allowed))
}
