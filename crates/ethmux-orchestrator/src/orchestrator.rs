//! Request fan-out across one master and any number of secondary backends.
//!
//! The orchestrator owns the client list and the plugin list. Every inbound
//! request is offered to the plugins, dispatched to the master (whose result
//! is the canonical one returned to the caller), then replayed against each
//! secondary with the master's outcome attached as context. Dispatch is
//! serialized by an internal mutex: identifier learning on the secondaries
//! assumes one logical request in flight at a time.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use ethmux_client::{BackendClient, CallContext, LocalCall};
use ethmux_common::hex::decode_quantity;
use ethmux_common::receipt::receipt_status;
use ethmux_common::protocol::{
    ClientResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcCall, RpcFailure,
};
use ethmux_common::{EthmuxError, Result};

use crate::plugin::{Plugin, PluginAction};

pub struct Orchestrator {
    master: RwLock<Option<Arc<dyn BackendClient>>>,
    clients: RwLock<Vec<Arc<dyn BackendClient>>>,
    plugins: RwLock<Vec<Arc<dyn Plugin>>>,
    /// The master's account list, captured when the master is attached and
    /// back-filled into every secondary.
    accounts: RwLock<Vec<String>>,
    /// Serializes `post`: one logical request in flight at a time.
    dispatch: Mutex<()>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self {
            master: RwLock::new(None),
            clients: RwLock::new(Vec::new()),
            plugins: RwLock::new(Vec::new()),
            accounts: RwLock::new(Vec::new()),
            dispatch: Mutex::new(()),
        }
    }

    /// Attaches the master backend. Exactly one master is allowed; its
    /// account list is fetched immediately and every already-registered
    /// secondary gets a matching account created for each entry.
    pub async fn set_master_client(&self, client: Arc<dyn BackendClient>) -> Result<()> {
        {
            let mut master = self.master.write().await;
            if master.is_some() {
                return Err(EthmuxError::InvalidRequest(
                    "a master client is already attached".into(),
                ));
            }
            info!(client = %client.name(), "attaching master client");
            *master = Some(client.clone());
        }

        let accounts = fetch_accounts(client.as_ref()).await;
        *self.accounts.write().await = accounts.clone();

        let secondaries = self.clients.read().await.clone();
        for secondary in secondaries {
            back_fill_accounts(client.as_ref(), secondary.as_ref(), &accounts).await;
        }
        Ok(())
    }

    /// Attaches a secondary backend. If a master is already attached, its
    /// accounts are back-filled into the new client before it joins the
    /// dispatch list.
    pub async fn add_client(&self, client: Arc<dyn BackendClient>) {
        info!(client = %client.name(), "attaching secondary client");
        if let Some(master) = self.master.read().await.clone() {
            let accounts = self.accounts.read().await.clone();
            back_fill_accounts(master.as_ref(), client.as_ref(), &accounts).await;
        }
        self.clients.write().await.push(client);
    }

    pub async fn add_plugin(&self, plugin: Arc<dyn Plugin>) {
        info!(plugin = %plugin.name(), "attaching plugin");
        self.plugins.write().await.push(plugin.clone());
        plugin.added(self).await;
    }

    /// Detaches the named plugin, firing its `shutdown`. Returns whether a
    /// plugin by that name was attached.
    pub async fn remove_plugin(&self, name: &str) -> bool {
        let found = self
            .plugins
            .read()
            .await
            .iter()
            .find(|p| p.name() == name)
            .cloned();
        let Some(plugin) = found else {
            return false;
        };
        // shutdown runs while the plugin is still attached: a plugin that
        // drains pending requests through `post` must still see its own
        // after_post for them
        plugin.shutdown(self).await;
        let mut plugins = self.plugins.write().await;
        if let Some(index) = plugins.iter().position(|p| p.name() == name) {
            plugins.remove(index);
        }
        true
    }

    /// Fires every plugin's `run` hook. Called once, after all clients and
    /// plugins are attached.
    pub async fn run_plugins(&self) {
        let plugins = self.plugins.read().await.clone();
        for plugin in plugins {
            plugin.run(self).await;
        }
    }

    /// The master's account list, in the master's namespace.
    pub async fn accounts(&self) -> Vec<String> {
        self.accounts.read().await.clone()
    }

    /// Backend names in result-list order: the master first, then every
    /// secondary in registration order.
    pub async fn client_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Some(master) = self.master.read().await.as_ref() {
            names.push(master.name());
        }
        names.extend(self.clients.read().await.iter().map(|c| c.name()));
        names
    }

    /// Dispatches one request: plugins first, then the master, then every
    /// secondary in registration order. The master's outcome is the return
    /// value; [`ClientResult::Absent`] means no master is attached (or a
    /// plugin dropped the request) and there is no canonical result.
    pub async fn post(&self, request: &JsonRpcRequest) -> ClientResult {
        let _guard = self.dispatch.lock().await;

        let mut request = request.clone();
        let plugins = self.plugins.read().await.clone();
        for plugin in &plugins {
            match plugin.before_post(self, &request).await {
                PluginAction::Unchanged => {}
                PluginAction::Replace(replacement) => {
                    debug!(
                        plugin = %plugin.name(),
                        method = %replacement.method,
                        "plugin replaced the request"
                    );
                    request = replacement;
                }
                PluginAction::Drop => {
                    info!(
                        plugin = %plugin.name(),
                        method = %request.method,
                        "plugin dropped the request; skipping dispatch"
                    );
                    return ClientResult::Absent;
                }
            }
        }

        let call = RpcCall::parse(request.clone());

        let master_result = match self.master.read().await.clone() {
            None => ClientResult::Absent,
            Some(master) => dispatch_one(master.as_ref(), &request, CallContext::default()).await,
        };

        let mut all_results = vec![master_result.clone()];
        let clients = self.clients.read().await.clone();
        for client in &clients {
            let ctx = CallContext::with_master(&master_result);
            let outcome = match client.call_local(&call, ctx).await {
                Ok(LocalCall::Handled(payload)) => ClientResult::Response(
                    JsonRpcResponse::success(None, payload.unwrap_or(Value::Null)),
                ),
                Ok(LocalCall::Unsupported) if client.is_self_posting() => {
                    dispatch_one(client.as_ref(), &request, ctx).await
                }
                Ok(LocalCall::Unsupported) => ClientResult::Absent,
                Err(e) => capture_failure(client.name(), &request, e),
            };
            all_results.push(outcome);
        }

        // No canonical outcome to report: the caller gets null and the
        // after_post hooks have nothing to compare against.
        if master_result.is_absent() {
            return ClientResult::Absent;
        }

        for plugin in &plugins {
            plugin.after_post(self, &request, &all_results).await;
        }
        master_result
    }

    /// Asks each backend in turn (master first) for a gas estimate,
    /// returning the first one that answers.
    pub async fn estimate_gas(&self, transaction: &Value) -> Result<u128> {
        let request = JsonRpcRequest::new("eth_estimateGas", json!([transaction]));
        let mut backends: Vec<Arc<dyn BackendClient>> = Vec::new();
        if let Some(master) = self.master.read().await.clone() {
            backends.push(master);
        }
        backends.extend(self.clients.read().await.iter().cloned());

        let mut last_error = None;
        for backend in backends {
            match backend.post(&request, CallContext::default()).await {
                Ok(response) => {
                    if let Some(estimate) = response
                        .result_value()
                        .and_then(Value::as_str)
                        .and_then(decode_quantity)
                    {
                        return Ok(estimate);
                    }
                }
                Err(e) => {
                    warn!(client = %backend.name(), error = %e, "gas estimation failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            EthmuxError::InvalidRequest("no backend produced a gas estimate".into())
        }))
    }

    /// Posts a contract-creation transaction, blocks until the master mines
    /// it, and returns the created contract's address (None when the receipt
    /// names none).
    pub async fn deploy_contract(
        &self,
        from_addr: &str,
        bytecode: &str,
        gas: u128,
    ) -> Result<Option<String>> {
        let request = JsonRpcRequest::new(
            "eth_sendTransaction",
            json!([{
                "from": from_addr,
                "data": bytecode,
                "gas": format!("0x{gas:x}"),
            }]),
        );
        let result = self.post(&request).await;
        let Some(tx_hash) = result.result_value().and_then(Value::as_str) else {
            return Ok(None);
        };
        let tx_hash = tx_hash.to_string();

        let Some(master) = self.master.read().await.clone() else {
            return Ok(None);
        };
        let receipt = master.wait_for_transaction(&tx_hash).await?;
        Ok(receipt
            .result_value()
            .and_then(ethmux_common::receipt::contract_address)
            .map(str::to_string))
    }

    /// Detaches everything: plugins first (firing their `shutdown`), then
    /// every backend.
    pub async fn shutdown(&self) {
        // plugins stay attached while their shutdown hooks run, for the same
        // reason as in remove_plugin
        let plugins = self.plugins.read().await.clone();
        for plugin in &plugins {
            plugin.shutdown(self).await;
        }
        self.plugins.write().await.clear();
        let clients = std::mem::take(&mut *self.clients.write().await);
        for client in clients {
            client.shutdown().await;
        }
        if let Some(master) = self.master.write().await.take() {
            master.shutdown().await;
        }
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

/// Dispatches a request to one backend, special-casing receipt lookups to
/// block until mined, and capturing a backend error as a value.
async fn dispatch_one(
    client: &dyn BackendClient,
    request: &JsonRpcRequest,
    ctx: CallContext<'_>,
) -> ClientResult {
    let outcome = if request.method == "eth_getTransactionReceipt" {
        dispatch_receipt(client, request, ctx).await
    } else {
        client.post(request, ctx).await
    };
    match outcome {
        Ok(response) => ClientResult::Response(response),
        Err(e) => capture_failure(client.name(), request, e),
    }
}

/// Receipt lookups block until mined on every backend. The master goes
/// straight to `wait_for_transaction`; a secondary is posted first (a
/// synchronizing wrapper resolves the receipt itself) and only polled out
/// here when it came back pending.
async fn dispatch_receipt(
    client: &dyn BackendClient,
    request: &JsonRpcRequest,
    ctx: CallContext<'_>,
) -> Result<JsonRpcResponse> {
    let Some(hash) = receipt_hash(request) else {
        return client.post(request, ctx).await;
    };
    if ctx.master.is_none() {
        return client.wait_for_transaction(&hash).await;
    }
    let response = client.post(request, ctx).await?;
    if receipt_status(&response).is_none() {
        return client.wait_for_transaction(&hash).await;
    }
    Ok(response)
}

/// Turns a dispatch error into the per-client slot value. A well-formed
/// JSON-RPC error keeps its wire payload; anything else is wrapped as an
/// internal error so the result list stays index-aligned.
fn capture_failure(client: String, request: &JsonRpcRequest, error: EthmuxError) -> ClientResult {
    match error {
        EthmuxError::Rpc(failure) => {
            debug!(client = %failure.client, error = %failure.error, "backend returned an error");
            ClientResult::Failure(failure)
        }
        other => {
            warn!(client = %client, error = %other, "backend call failed");
            ClientResult::Failure(RpcFailure {
                client,
                request: serde_json::to_value(request).unwrap_or(Value::Null),
                error: JsonRpcError::internal_error(&other.to_string()),
            })
        }
    }
}

fn receipt_hash(request: &JsonRpcRequest) -> Option<String> {
    request
        .params
        .as_ref()
        .and_then(|p| p.get(0))
        .and_then(Value::as_str)
        .map(str::to_string)
}

async fn fetch_accounts(master: &dyn BackendClient) -> Vec<String> {
    let request = JsonRpcRequest::bare("eth_accounts");
    match master.post(&request, CallContext::default()).await {
        Ok(response) => response
            .result_value()
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        Err(e) => {
            warn!(error = %e, "could not fetch the master's account list");
            Vec::new()
        }
    }
}

/// Creates a counterpart on `secondary` for each of the master's accounts,
/// carrying the master's current balance over.
async fn back_fill_accounts(
    master: &dyn BackendClient,
    secondary: &dyn BackendClient,
    accounts: &[String],
) {
    for account in accounts {
        let balance = fetch_balance(master, account).await.unwrap_or(0);
        match secondary.create_account(balance, Some(account.clone())).await {
            Ok(created) => {
                debug!(
                    client = %secondary.name(),
                    account = %account,
                    ?created,
                    "back-filled master account"
                );
            }
            Err(e) => {
                warn!(
                    client = %secondary.name(),
                    account = %account,
                    error = %e,
                    "could not back-fill master account"
                );
            }
        }
    }
}

async fn fetch_balance(master: &dyn BackendClient, account: &str) -> Option<u128> {
    let request = JsonRpcRequest::new("eth_getBalance", json!([account, "latest"]));
    let response = master.post(&request, CallContext::default()).await.ok()?;
    response
        .result_value()
        .and_then(Value::as_str)
        .and_then(decode_quantity)
}
