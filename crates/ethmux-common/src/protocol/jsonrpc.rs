//! JSON-RPC 2.0 protocol types.
//!
//! ethmux speaks plain JSON-RPC 2.0 to every backend:
//! - Request format: `{"jsonrpc": "2.0", "method": "...", "params": ..., "id": ...}`
//! - Response format: `{"jsonrpc": "2.0", "result": ..., "error": ..., "id": ...}`
//! - Error format: `{"code": ..., "message": "...", "data": ...}`
//!
//! Unlike a strict server-side implementation, the request type here keeps
//! `jsonrpc`, `id` and `params` optional: test harnesses routinely omit them,
//! and the HTTP client fills in the version and rewrites the id before the
//! request hits the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The protocol version attached to outbound requests.
pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC 2.0 request.
///
/// `params` may be a positional array or a single object of named arguments
/// (see [`crate::protocol::call::RpcCall`] for the parsed form). Fields that
/// are `None` are omitted from the serialized body entirely, matching what
/// Ethereum clients expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version; filled in by the transport when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,
    /// Name of the method to invoke
    pub method: String,
    /// Parameter values (array or object), if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Caller-chosen request identifier (number, string, or null)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    /// Creates a request with the version already attached.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.into()),
            method: method.into(),
            params: Some(params),
            id: Some(Value::from(1)),
        }
    }

    /// Creates a request without params.
    pub fn bare(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.into()),
            method: method.into(),
            params: None,
            id: Some(Value::from(1)),
        }
    }

    /// Sets the caller id.
    pub fn with_id(mut self, id: Value) -> Self {
        self.id = Some(id);
        self
    }
}

/// A JSON-RPC 2.0 response.
///
/// Exactly one of `result` and `error` is populated by a conforming backend.
/// Note that `result` may legitimately be JSON `null` (a pending transaction
/// receipt, for instance), which is distinct from the field being absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,
    /// Result value on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error object on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// Request identifier, echoing the request's id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl JsonRpcResponse {
    /// Creates a success response.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.into()),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Creates an error response.
    pub fn error(id: Option<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.into()),
            result: None,
            error: Some(error),
            id,
        }
    }

    /// True when the backend reported a JSON-RPC error object.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The `result` value, if present and non-null.
    pub fn result_value(&self) -> Option<&Value> {
        match &self.result {
            Some(Value::Null) | None => None,
            Some(v) => Some(v),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code (standard codes are negative integers)
    pub code: i64,
    /// Short description of the error
    pub message: String,
    /// Additional data, if the backend attached any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// Standard JSON-RPC 2.0 error codes
/// Invalid JSON was received by the server
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid Request object
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist / is not available
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameter(s)
pub const INVALID_PARAMS: i64 = -32602;
/// Internal JSON-RPC error
pub const INTERNAL_ERROR: i64 = -32603;

impl JsonRpcError {
    /// Create a parse error (-32700).
    pub fn parse_error() -> Self {
        Self {
            code: PARSE_ERROR,
            message: "Parse error".into(),
            data: None,
        }
    }

    /// Create an invalid request error (-32600).
    pub fn invalid_request(msg: &str) -> Self {
        Self {
            code: INVALID_REQUEST,
            message: format!("Invalid Request: {msg}"),
            data: None,
        }
    }

    /// Create a method not found error (-32601).
    pub fn method_not_found() -> Self {
        Self {
            code: METHOD_NOT_FOUND,
            message: "Method not found".into(),
            data: None,
        }
    }

    /// Create an invalid params error (-32602).
    pub fn invalid_params(msg: &str) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: msg.into(),
            data: None,
        }
    }

    /// Create an internal error (-32603).
    pub fn internal_error(msg: &str) -> Self {
        Self {
            code: INTERNAL_ERROR,
            message: msg.into(),
            data: None,
        }
    }

    /// Create a server error (-32000).
    pub fn server_error(msg: &str) -> Self {
        Self {
            code: -32000,
            message: msg.into(),
            data: None,
        }
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}
