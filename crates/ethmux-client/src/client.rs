//! The backend client contract.

use async_trait::async_trait;
use serde_json::Value;

use ethmux_common::protocol::{ClientResult, JsonRpcRequest, JsonRpcResponse, RpcCall};
use ethmux_common::Result;

/// Per-request context threaded through dispatch.
///
/// Secondary clients need the master's outcome for the in-flight request:
/// identifier synchronization learns mappings from it, and analysis-only
/// clients validate against it. Passing it explicitly (instead of parking it
/// in a shared field on the orchestrator) keeps concurrent dispatch safe.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallContext<'a> {
    /// The master backend's outcome for this request, once it has been
    /// dispatched. `None` while the master itself is being called, or when
    /// no master is configured.
    pub master: Option<&'a ClientResult>,
}

impl<'a> CallContext<'a> {
    pub fn with_master(master: &'a ClientResult) -> Self {
        Self {
            master: Some(master),
        }
    }

    /// The master's non-null `result` value, when it succeeded.
    pub fn master_result(&self) -> Option<&'a Value> {
        self.master.and_then(|m| m.result_value())
    }
}

/// Outcome of asking a client to create an account.
///
/// `Unsupported` is a normal result, not an error: a wrapping layer falls
/// back to auto-generating an address and recording the mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountCreation {
    /// The account exists at this hex address
    Created(String),
    /// The client cannot honor the request (typically a specific requested
    /// address on a client that only hands out pre-generated accounts)
    Unsupported,
}

/// Outcome of offering a call to a client's local method registry.
#[derive(Debug, Clone)]
pub enum LocalCall {
    /// No local handler for this method
    Unsupported,
    /// Handled locally; the payload is whatever the handler produced
    Handled(Option<Value>),
}

/// A backend that can execute JSON-RPC calls.
///
/// One instance is attached to exactly one orchestrator. Implementations
/// fall into two camps:
/// - *self-posting* clients forward calls over their own transport
///   ([`crate::RpcHttpClient`], or a synchronization wrapper around one)
/// - *local* clients answer a fixed set of methods in-process (an analysis
///   backend mimicking the chain), advertised through [`Self::call_local`]
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Short name used in logs and differential reports.
    fn name(&self) -> String;

    /// Executes one JSON-RPC call.
    ///
    /// A well-formed JSON-RPC *error* response comes back as
    /// [`ethmux_common::EthmuxError::Rpc`] so the orchestrator can capture
    /// it as a value and keep routing to sibling clients.
    async fn post(
        &self,
        request: &JsonRpcRequest,
        ctx: CallContext<'_>,
    ) -> Result<JsonRpcResponse>;

    /// Requests an account with the given starting balance, optionally at a
    /// specific address.
    async fn create_account(
        &self,
        balance: u128,
        address: Option<String>,
    ) -> Result<AccountCreation>;

    /// Whether the backend currently answers on its endpoint.
    async fn is_running(&self) -> bool;

    /// Blocks until the backend answers on its endpoint.
    async fn wait_until_running(&self);

    /// Blocks until the given transaction has been mined (or is known to
    /// have failed), returning the receipt response.
    ///
    /// The default is for clients with no notion of mining.
    async fn wait_for_transaction(&self, tx_hash: &str) -> Result<JsonRpcResponse> {
        let _ = tx_hash;
        Ok(JsonRpcResponse::success(None, Value::Null))
    }

    /// Offers a parsed call to the client's local method registry.
    ///
    /// Local clients receive the master's outcome through `ctx` so they can
    /// mimic or validate against it. The default registry is empty.
    async fn call_local(&self, call: &RpcCall, ctx: CallContext<'_>) -> Result<LocalCall> {
        let _ = (call, ctx);
        Ok(LocalCall::Unsupported)
    }

    /// Whether this client forwards calls over a wire transport.
    fn is_self_posting(&self) -> bool {
        true
    }

    /// Releases any resources the client holds.
    async fn shutdown(&self) {}
}
