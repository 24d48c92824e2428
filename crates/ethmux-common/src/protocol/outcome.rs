//! Per-backend call outcomes.
//!
//! The orchestrator fans one request out to several backends and hands
//! plugins the *full ordered* outcome list, `[master, secondary1, ...]`. A
//! backend that returned a JSON-RPC error is represented as a typed
//! [`RpcFailure`] value in its slot rather than being omitted or thrown, so
//! sibling backends keep running and the list stays index-aligned with the
//! client list.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::jsonrpc::{JsonRpcError, JsonRpcResponse};

/// A backend's JSON-RPC error, captured as a value.
///
/// Carries enough context to diagnose which client failed on which request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcFailure {
    /// Name of the client that produced the error
    pub client: String,
    /// The request that triggered it, as sent to that client
    pub request: Value,
    /// The wire-format error object
    pub error: JsonRpcError,
}

impl std::fmt::Display for RpcFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "JSON-RPC error in client {} when processing {}: {}",
            self.client, self.request, self.error
        )
    }
}

/// The outcome of dispatching one request to one backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientResult {
    /// The backend answered (the response may still carry `result: null`)
    Response(JsonRpcResponse),
    /// The backend answered with a JSON-RPC error object
    Failure(RpcFailure),
    /// The backend was not asked (no master configured, or a secondary with
    /// no handler for this method)
    Absent,
}

impl ClientResult {
    /// The response, when the call succeeded.
    pub fn response(&self) -> Option<&JsonRpcResponse> {
        match self {
            ClientResult::Response(r) => Some(r),
            _ => None,
        }
    }

    /// The non-null `result` value, when the call succeeded and produced one.
    pub fn result_value(&self) -> Option<&Value> {
        self.response().and_then(|r| r.result_value())
    }

    /// The typed failure, when the backend erred.
    pub fn failure(&self) -> Option<&RpcFailure> {
        match self {
            ClientResult::Failure(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ClientResult::Failure(_))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, ClientResult::Absent)
    }

    /// Converts the outcome back into a wire-format response for the
    /// transport layer, restoring the caller's id.
    ///
    /// Returns `None` for [`ClientResult::Absent`]: with no canonical result
    /// there is nothing to put on the wire.
    pub fn into_wire(self, id: Option<Value>) -> Option<JsonRpcResponse> {
        match self {
            ClientResult::Response(mut r) => {
                r.id = id;
                Some(r)
            }
            ClientResult::Failure(f) => Some(JsonRpcResponse::error(id, f.error)),
            ClientResult::Absent => None,
        }
    }
}
