//! JSON-RPC 2.0 envelope and popup domain types.
//!
//! Both transports speak the same wire format: one JSON-RPC message per
//! line (stdio) or per request body (HTTP). Responses carry exactly one of
//! {result, error}, enforced by the constructor API.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

/// The fixed protocol version tag. Anything else is rejected.
pub const JSONRPC_VERSION: &str = "2.0";

// ============================================================================
// Error codes
// ============================================================================

/// Malformed wire payload. The caller identifier is forced to null.
pub const PARSE_ERROR: i32 = -32700;
/// No handler for the method (defensive; validation rejects unknown methods first).
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Structurally well-formed but semantically invalid request.
pub const INVALID_PARAMS: i32 = -32602;
/// Any unexpected failure. Details are logged server-side, never leaked.
pub const INTERNAL_ERROR: i32 = -32603;
/// Application-defined: popup unavailable, response timeout, disposal.
pub const APPLICATION_ERROR: i32 = -32000;

// ============================================================================
// JSON-RPC Types
// ============================================================================

/// A validated JSON-RPC request. Built from a raw `Value` only after the
/// validator has accepted it, so deserialization cannot fail in practice.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    /// Opaque caller-supplied identifier, echoed back verbatim. Uniqueness
    /// is not enforced; correlation is keyed on the internal request id.
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn error_with_data(id: Value, code: i32, message: impl Into<String>, data: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: Some(data),
            }),
        }
    }

    /// Serialize to the wire. Our response types always serialize; the
    /// fallback keeps the dispatcher's no-exception-escapes contract.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            error!(error = %e, "Failed to serialize response");
            format!(
                r#"{{"jsonrpc":"2.0","error":{{"code":{INTERNAL_ERROR},"message":"Internal serialization error"}},"id":null}}"#
            )
        })
    }
}

// ============================================================================
// Transport tag
// ============================================================================

/// Transport a request arrived on. Carried through the correlation core so
/// replies can be attributed in logs and diagnostics; never used for routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Stdio,
    Http,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => f.write_str("stdio"),
            Self::Http => f.write_str("http"),
        }
    }
}

// ============================================================================
// Popup domain types
// ============================================================================

/// One selectable option presented to the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PopupOption {
    pub label: String,
    pub value: String,
}

/// Parameters of the `triggerPopup` method.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerPopupParams {
    pub workspace_path: String,
    pub title: String,
    pub message: String,
    pub options: Vec<PopupOption>,
}

/// Internally-tagged popup request handed to the external trigger sink.
///
/// `request_id` is the internal correlation key, distinct from the
/// caller-supplied JSON-RPC id; the sink echoes it back in the reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PopupRequest {
    pub request_id: String,
    pub workspace_path: String,
    pub title: String,
    pub message: String,
    pub options: Vec<PopupOption>,
}

impl PopupRequest {
    pub fn new(request_id: String, params: TriggerPopupParams) -> Self {
        Self {
            request_id,
            workspace_path: params.workspace_path,
            title: params.title,
            message: params.message,
            options: params.options,
        }
    }
}

/// Reply produced by the external actor for a pending popup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PopupReply {
    pub request_id: String,
    pub selected_value: String,
}
