//! HTTP JSON-RPC transport.
//!
//! One fresh connection per request for fault isolation: a failed call
//! never poisons a pooled socket. Two quirks of the multiplexing setup live
//! here:
//!
//! - **Wire-id reassignment**: several logical callers share one backend
//!   endpoint, so the caller's `id` is replaced with an internally unique
//!   monotonic id for the wire call and restored on the way out.
//! - **Reconnect-retry**: a "remote end closed the connection" class of
//!   failure means a backend is still warming up, not that it is gone. Those
//!   are retried indefinitely with a short backoff.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Request;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use ethmux_common::hex::{decode_quantity, format_hex_address};
use ethmux_common::protocol::{JsonRpcRequest, JsonRpcResponse, RpcFailure, JSONRPC_VERSION};
use ethmux_common::receipt::receipt_status;
use ethmux_common::{EthmuxError, Result};

use crate::client::{AccountCreation, BackendClient, CallContext};

/// How often `wait_for_transaction` re-polls a pending receipt.
pub const DEFAULT_RECEIPT_POLL: Duration = Duration::from_secs(5);
/// How long to sleep before retrying a reset connection.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Default)]
struct AccountPool {
    /// `eth_accounts` result, fetched lazily on first use
    accounts: Option<Vec<String>>,
    /// Index of the next unhanded-out account
    next: usize,
}

/// A self-posting JSON-RPC client over HTTP.
pub struct RpcHttpClient {
    url: String,
    short_name: Option<String>,
    wire_id: AtomicU64,
    receipt_poll: Duration,
    retry_backoff: Duration,
    accounts: Mutex<AccountPool>,
    /// Transactions known to have failed on the master; consulted so
    /// `wait_for_transaction` does not block forever on a receipt that will
    /// never resolve.
    failed_transactions: Mutex<HashSet<String>>,
}

impl RpcHttpClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            short_name: None,
            wire_id: AtomicU64::new(0),
            receipt_poll: DEFAULT_RECEIPT_POLL,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            accounts: Mutex::new(AccountPool::default()),
            failed_transactions: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.short_name = Some(name.into());
        self
    }

    pub fn with_receipt_poll(mut self, interval: Duration) -> Self {
        self.receipt_poll = interval;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Marks a master-side transaction hash as failed so later receipt
    /// polling for it can return instead of spinning.
    pub async fn record_failed_transaction(&self, tx_hash: &str) {
        self.failed_transactions
            .lock()
            .await
            .insert(tx_hash.to_ascii_lowercase());
    }

    /// Executes one call, retrying transient transport failures forever.
    ///
    /// Does *not* convert a JSON-RPC error response into an `Err`; that is
    /// the trait `post`'s job. Gas/nonce helpers and receipt polling come
    /// through here.
    pub async fn post_raw(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let mut outbound = request.clone();
        if outbound.jsonrpc.is_none() {
            outbound.jsonrpc = Some(JSONRPC_VERSION.into());
        }
        // Reassign the wire id; several callers share this endpoint.
        let caller_id = outbound.id.take();
        let wire_id = self.wire_id.fetch_add(1, Ordering::Relaxed) + 1;
        outbound.id = Some(Value::from(wire_id));

        let mut response = loop {
            match self.send_http(&outbound).await {
                Ok(response) => break response,
                Err(e) if e.is_transient() => {
                    warn!(client = %self.name(), "{e}");
                    tokio::time::sleep(self.retry_backoff).await;
                    info!(client = %self.name(), url = %self.url, "retrying JSON-RPC call");
                }
                Err(e) => return Err(e),
            }
        };

        // Restore the caller's id on the way out.
        if caller_id.is_some() {
            response.id = caller_id;
        }
        Ok(response)
    }

    async fn send_http(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let body = serde_json::to_vec(request)?;
        let http_request = Request::builder()
            .method("POST")
            .uri(&self.url)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| EthmuxError::Transport(format!("failed to build request: {e}")))?;

        let client = Client::builder(TokioExecutor::new()).build_http();
        let response = client.request(http_request).await.map_err(|e| {
            if e.is_connect() {
                EthmuxError::ConnectionReset(format!("{}: {e}", self.url))
            } else {
                // hyper surfaces a mid-body peer hangup as a generic client
                // error; treat anything mentioning the connection as the
                // same warming-up condition
                let text = format!("{e}");
                if text.contains("connection") {
                    EthmuxError::ConnectionReset(format!("{}: {text}", self.url))
                } else {
                    EthmuxError::Transport(format!("{}: {text}", self.url))
                }
            }
        })?;

        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| EthmuxError::ConnectionReset(format!("{}: {e}", self.url)))?
            .to_bytes();

        Ok(serde_json::from_slice(&bytes)?)
    }

    fn failure(&self, request: &JsonRpcRequest, response: &JsonRpcResponse) -> RpcFailure {
        RpcFailure {
            client: self.name(),
            request: serde_json::to_value(request).unwrap_or(Value::Null),
            error: response
                .error
                .clone()
                .expect("failure() requires an error response"),
        }
    }

    /// Estimates the gas cost of a transaction, propagating a typed RPC
    /// error so the caller can try the next client.
    pub async fn estimate_gas(&self, transaction: &JsonRpcRequest) -> Result<u128> {
        let request = JsonRpcRequest {
            jsonrpc: Some(JSONRPC_VERSION.into()),
            method: "eth_estimateGas".into(),
            params: transaction.params.clone(),
            id: Some(Value::from(1)),
        };
        let response = self.post(&request, CallContext::default()).await?;
        self.decode_integer(&response, "eth_estimateGas")
    }

    /// The backend's current gas price in wei.
    pub async fn get_gas_price(&self) -> Result<u128> {
        let response = self
            .post(&JsonRpcRequest::bare("eth_gasPrice"), CallContext::default())
            .await?;
        self.decode_integer(&response, "eth_gasPrice")
    }

    /// The backend's network id.
    pub async fn get_net_version(&self) -> Result<u128> {
        let response = self
            .post(&JsonRpcRequest::bare("net_version"), CallContext::default())
            .await?;
        self.decode_integer(&response, "net_version")
    }

    /// The sender's next nonce.
    pub async fn get_transaction_count(&self, from_address: &str) -> Result<u128> {
        let request = JsonRpcRequest::new(
            "eth_getTransactionCount",
            json!([format_hex_address(from_address), "latest"]),
        );
        let response = self.post(&request, CallContext::default()).await?;
        self.decode_integer(&response, "eth_getTransactionCount")
    }

    fn decode_integer(&self, response: &JsonRpcResponse, method: &str) -> Result<u128> {
        let value = response
            .result_value()
            .ok_or_else(|| EthmuxError::InvalidResponse {
                client: self.name(),
                message: format!("{method} returned no result"),
            })?;
        let text = match value {
            Value::String(s) => s.as_str(),
            Value::Number(n) => {
                return n.as_u64().map(u128::from).ok_or_else(|| {
                    EthmuxError::InvalidResponse {
                        client: self.name(),
                        message: format!("{method} returned a non-integer number"),
                    }
                })
            }
            _ => {
                return Err(EthmuxError::InvalidResponse {
                    client: self.name(),
                    message: format!("{method} returned a non-quantity result"),
                })
            }
        };
        decode_quantity(text).ok_or_else(|| EthmuxError::InvalidResponse {
            client: self.name(),
            message: format!("{method} returned undecodable quantity {text:?}"),
        })
    }
}

#[async_trait]
impl BackendClient for RpcHttpClient {
    fn name(&self) -> String {
        match &self.short_name {
            Some(name) => name.clone(),
            None => format!("RpcHttpClient<{}>", self.url),
        }
    }

    async fn post(
        &self,
        request: &JsonRpcRequest,
        ctx: CallContext<'_>,
    ) -> Result<JsonRpcResponse> {
        let response = self.post_raw(request).await?;
        if response.is_error() {
            // A failed send on a secondary leaves the master's hash orphaned;
            // remember it so receipt polling for it can bail out.
            if matches!(
                request.method.as_str(),
                "eth_sendTransaction" | "eth_sendRawTransaction"
            ) {
                if let Some(Value::String(master_hash)) = ctx.master_result() {
                    error!(
                        client = %self.name(),
                        master_tx = %master_hash,
                        "failed transaction associated with master client transaction"
                    );
                    self.record_failed_transaction(master_hash).await;
                }
            }
            return Err(EthmuxError::Rpc(self.failure(request, &response)));
        }
        Ok(response)
    }

    async fn create_account(
        &self,
        _balance: u128,
        address: Option<String>,
    ) -> Result<AccountCreation> {
        // This client only hands out the backend's pre-funded accounts; it
        // cannot mint one at a chosen address.
        if address.is_some() {
            return Ok(AccountCreation::Unsupported);
        }
        let mut pool = self.accounts.lock().await;
        if pool.accounts.is_none() {
            let response = self
                .post(&JsonRpcRequest::bare("eth_accounts"), CallContext::default())
                .await?;
            let listed = response
                .result_value()
                .and_then(Value::as_array)
                .ok_or_else(|| EthmuxError::InvalidResponse {
                    client: self.name(),
                    message: "eth_accounts returned no account list".into(),
                })?
                .iter()
                .filter_map(Value::as_str)
                .map(format_hex_address)
                .collect();
            pool.accounts = Some(listed);
        }
        let accounts = pool.accounts.as_ref().expect("populated above");
        let account = accounts
            .get(pool.next)
            .cloned()
            .ok_or_else(|| EthmuxError::InvalidResponse {
                client: self.name(),
                message: format!("account pool exhausted after {} accounts", pool.next),
            })?;
        pool.next += 1;
        Ok(AccountCreation::Created(account))
    }

    async fn is_running(&self) -> bool {
        let probe = Request::builder()
            .method("GET")
            .uri(&self.url)
            .body(Full::new(Bytes::new()));
        let Ok(probe) = probe else { return false };
        let client = Client::builder(TokioExecutor::new()).build_http();
        // Any HTTP response at all, error status included, means the
        // endpoint is up.
        client.request(probe).await.is_ok()
    }

    async fn wait_until_running(&self) {
        let mut slept = Duration::ZERO;
        while !self.is_running().await {
            tokio::time::sleep(Duration::from_millis(250)).await;
            slept += Duration::from_millis(250);
            if slept.as_millis() % 5000 == 0 {
                info!(client = %self.name(), "waiting for the client to start...");
            }
        }
    }

    async fn wait_for_transaction(&self, tx_hash: &str) -> Result<JsonRpcResponse> {
        let tx_hash = tx_hash.to_ascii_lowercase();
        let request = JsonRpcRequest::new("eth_getTransactionReceipt", json!([tx_hash]));
        loop {
            let receipt = self.post(&request, CallContext::default()).await?;
            let known_failed = self.failed_transactions.lock().await.contains(&tx_hash);
            if known_failed || receipt_status(&receipt).is_some() {
                return Ok(receipt);
            }
            info!(client = %self.name(), tx = %tx_hash, "waiting to mine transaction...");
            tokio::time::sleep(self.receipt_poll).await;
        }
    }
}

impl std::fmt::Debug for RpcHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcHttpClient")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}
