//! HTTP boundary helpers.
//!
//! The front-end receives one JSON-RPC object per POST, either bare or as a
//! singleton array. The array form is unwrapped before dispatch and the
//! response re-wrapped on the way out. Malformed bodies are rejected here,
//! before anything reaches the orchestrator.

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::protocol::JsonRpcRequest;

/// Rejections the transport layer maps onto HTTP status codes.
#[derive(Error, Debug, PartialEq)]
pub enum BoundaryError {
    /// Missing `jsonrpc`/`method`, an unparsable version, a multi-element
    /// batch, or invalid JSON. Maps to 400.
    #[error("malformed request: {0}")]
    Malformed(String),
    /// `jsonrpc` parsed below 2.0. Maps to 426 Upgrade Required.
    #[error("protocol version {0} is below 2.0")]
    UpgradeRequired(f64),
}

/// A parsed inbound request, remembering whether it arrived wrapped in a
/// singleton array.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub request: JsonRpcRequest,
    pub was_list: bool,
}

/// How the declared protocol version compared to 2.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VersionCheck {
    Exact,
    /// Above 2.0: accepted, but the caller is ahead of us.
    Newer(f64),
}

/// Parses and validates a request body.
///
/// Versions above 2.0 are accepted with a warning; versions below are
/// rejected with [`BoundaryError::UpgradeRequired`].
pub fn parse_body(body: &[u8]) -> Result<InboundRequest, BoundaryError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| BoundaryError::Malformed(format!("invalid JSON: {e}")))?;

    let (value, was_list) = match value {
        Value::Array(mut items) => {
            if items.len() != 1 {
                return Err(BoundaryError::Malformed(format!(
                    "expected a single request, got a batch of {}",
                    items.len()
                )));
            }
            (items.remove(0), true)
        }
        other => (other, false),
    };

    let request: JsonRpcRequest = serde_json::from_value(value)
        .map_err(|e| BoundaryError::Malformed(format!("not a JSON-RPC request: {e}")))?;

    match check_version(&request)? {
        VersionCheck::Exact => {}
        VersionCheck::Newer(v) => {
            warn!(
                version = v,
                method = %request.method,
                "client is using a newer JSON-RPC protocol version than 2.0"
            );
        }
    }

    Ok(InboundRequest { request, was_list })
}

/// Validates the declared `jsonrpc` version against 2.0.
pub fn check_version(request: &JsonRpcRequest) -> Result<VersionCheck, BoundaryError> {
    let raw = request
        .jsonrpc
        .as_deref()
        .ok_or_else(|| BoundaryError::Malformed("missing jsonrpc field".into()))?;
    let version: f64 = raw
        .parse()
        .map_err(|_| BoundaryError::Malformed(format!("unparsable jsonrpc version {raw:?}")))?;
    if version < 2.0 {
        Err(BoundaryError::UpgradeRequired(version))
    } else if version > 2.0 {
        Ok(VersionCheck::Newer(version))
    } else {
        Ok(VersionCheck::Exact)
    }
}

/// Re-wraps a response to match the shape the request arrived in.
pub fn rewrap(response: Value, was_list: bool) -> Value {
    if was_list {
        Value::Array(vec![response])
    } else {
        response
    }
}
