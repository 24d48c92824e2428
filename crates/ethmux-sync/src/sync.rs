//! The synchronizing client decorator.
//!
//! Wraps an HTTP backend client and makes it answer requests phrased in the
//! master backend's identifier namespace: outbound parameters are rewritten
//! through the [`IdentifierMap`], and new mappings are learned from each
//! request/response pair on the way back in. The wrapper holds a reference
//! to the inner client and implements the same interface; the inner client
//! is never mutated.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use ethmux_client::{AccountCreation, BackendClient, CallContext, RpcHttpClient};
use ethmux_common::hex::{canonicalize, decode_hex, decode_quantity};
use ethmux_common::protocol::{JsonRpcRequest, JsonRpcResponse};
use ethmux_common::receipt::{contract_address, receipt_status};
use ethmux_common::{EthmuxError, Result};

use crate::identifiers::{creates_filter, IdentifierMap};
use crate::signing::{derive_address, sign_legacy_transaction, LegacyTransaction};

/// Gas limit applied when a transaction names none.
const DEFAULT_GAS: u128 = 90_000;

/// Offline signing state for backends with no local account management.
///
/// Holds a pool of pre-generated, pre-funded keypairs. `create_account`
/// assigns one per request; `eth_sendTransaction` resolves the (remapped)
/// sender to its key and signs locally.
pub struct RawSigner {
    /// canonical address -> signing key, for every assigned account
    keys: Mutex<HashMap<String, SigningKey>>,
    /// unassigned pre-funded keypairs, in provisioning order
    pool: Mutex<VecDeque<(String, SigningKey)>>,
    /// cached network id used as the EIP-155 chain id
    chain_id: Mutex<Option<u64>>,
}

impl RawSigner {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            pool: Mutex::new(VecDeque::new()),
            chain_id: Mutex::new(None),
        }
    }

    /// Pins the EIP-155 chain id instead of fetching `net_version`.
    pub async fn set_chain_id(&self, chain_id: u64) {
        *self.chain_id.lock().await = Some(chain_id);
    }

    /// Adds a pre-funded keypair to the pool. The key is resolvable by its
    /// derived address immediately, before any pool assignment.
    pub async fn add_key(&self, key: SigningKey) {
        let address = derive_address(&key);
        if let Some(canonical) = canonicalize(&address) {
            self.keys.lock().await.insert(canonical, key.clone());
        }
        self.pool.lock().await.push_back((address, key));
    }

    async fn assign_next(&self) -> Result<String> {
        let (address, key) = self.pool.lock().await.pop_front().ok_or_else(|| {
            EthmuxError::InvalidRequest("no pre-funded keypairs left in the pool".into())
        })?;
        let canonical = canonicalize(&address)
            .ok_or_else(|| EthmuxError::Signing(format!("bad derived address {address}")))?;
        self.keys.lock().await.insert(canonical, key);
        Ok(address)
    }

    async fn key_for(&self, address: &str) -> Option<SigningKey> {
        let canonical = canonicalize(address)?;
        self.keys.lock().await.get(&canonical).cloned()
    }
}

impl Default for RawSigner {
    fn default() -> Self {
        Self::new()
    }
}

/// A decorator that presents the master's identifier namespace over a
/// secondary HTTP backend.
pub struct SyncClient {
    inner: RpcHttpClient,
    maps: Mutex<IdentifierMap>,
    signer: Option<RawSigner>,
    receipt_poll: Duration,
}

impl SyncClient {
    pub fn new(inner: RpcHttpClient) -> Self {
        Self {
            inner,
            maps: Mutex::new(IdentifierMap::new()),
            signer: None,
            receipt_poll: Duration::from_secs(5),
        }
    }

    /// Enables the raw-transaction variant: `eth_sendTransaction` is signed
    /// offline and forwarded as `eth_sendRawTransaction`.
    pub fn with_signer(mut self, signer: RawSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_receipt_poll(mut self, interval: Duration) -> Self {
        self.receipt_poll = interval;
        self
    }

    pub fn inner(&self) -> &RpcHttpClient {
        &self.inner
    }

    /// Seeds an address mapping directly (used when provisioning already
    /// knows both sides, e.g. pre-funded raw accounts).
    pub async fn seed_address(&self, master: &str, secondary: &str) {
        self.maps.lock().await.record_address(master, secondary);
    }

    async fn remap_request(&self, request: &JsonRpcRequest) -> JsonRpcRequest {
        let mut remapped = request.clone();
        if let Some(params) = &request.params {
            remapped.params = Some(
                self.maps
                    .lock()
                    .await
                    .remap_params(&request.method, params),
            );
        }
        remapped
    }

    /// Forwards a receipt request, polling until this secondary's receipt
    /// resolves too, then learns the contract-address pair if one was
    /// created.
    async fn forward_receipt(
        &self,
        request: &JsonRpcRequest,
        ctx: CallContext<'_>,
    ) -> Result<JsonRpcResponse> {
        // If the master's receipt already shows the transaction failed,
        // there is nothing to wait for on this side.
        if let Some(master_response) = ctx.master.and_then(|m| m.response()) {
            if receipt_status(master_response) == Some(false) {
                debug!(
                    client = %self.name(),
                    "master receipt shows a failed transaction; skipping secondary"
                );
                return Ok(master_response.clone());
            }
        }

        let remapped = self.remap_request(request).await;
        let mut response = self.inner.post(&remapped, ctx).await?;
        while receipt_status(&response).is_none() {
            info!(
                client = %self.name(),
                "waiting for the secondary to mine the transaction..."
            );
            tokio::time::sleep(self.receipt_poll).await;
            response = self.inner.post(&remapped, ctx).await?;
        }

        // Contract creation: pair the master's address with ours.
        if let (Some(master_result), Some(our_result)) = (
            ctx.master_result(),
            response.result_value(),
        ) {
            if let (Some(master_addr), Some(our_addr)) = (
                contract_address(master_result),
                contract_address(our_result),
            ) {
                self.maps.lock().await.record_address(master_addr, our_addr);
            }
        }
        Ok(response)
    }

    /// Learns identifier pairs from a completed non-receipt call.
    async fn learn_from_response(
        &self,
        request: &JsonRpcRequest,
        response: &JsonRpcResponse,
        ctx: CallContext<'_>,
    ) {
        let method = request.method.as_str();
        if matches!(method, "eth_sendTransaction" | "eth_sendRawTransaction") {
            match (ctx.master_result(), response.result_value()) {
                (Some(Value::String(master_hash)), Some(Value::String(our_hash))) => {
                    self.maps
                        .lock()
                        .await
                        .record_transaction(master_hash, our_hash);
                }
                (None, None) => {}
                (master, ours) => {
                    // one side produced a hash and the other didn't; that is
                    // suspicious but not fatal
                    warn!(
                        client = %self.name(),
                        master = ?master,
                        secondary = ?ours,
                        "transaction hashes did not pair up"
                    );
                }
            }
        } else if creates_filter(method) {
            if let (Some(master_id), Some(our_id)) =
                (ctx.master_result(), response.result_value())
            {
                self.maps.lock().await.record_filter(master_id, our_id);
            }
        } else if method.eq_ignore_ascii_case("eth_uninstallFilter") {
            if response.result_value() == Some(&Value::Bool(true)) {
                if let Some(master_id) = request.params.as_ref().and_then(|p| p.get(0)) {
                    self.maps.lock().await.remove_filter(master_id);
                }
            }
        }
    }

    /// Builds, signs, and submits a raw transaction in place of
    /// `eth_sendTransaction`.
    async fn forward_signed(
        &self,
        signer: &RawSigner,
        request: &JsonRpcRequest,
        ctx: CallContext<'_>,
    ) -> Result<JsonRpcResponse> {
        let remapped = self.remap_request(request).await;
        let tx = remapped
            .params
            .as_ref()
            .and_then(|p| p.get(0))
            .and_then(Value::as_object)
            .ok_or_else(|| {
                EthmuxError::InvalidRequest("eth_sendTransaction without a transaction".into())
            })?;

        let from = tx
            .get("from")
            .and_then(Value::as_str)
            .ok_or_else(|| EthmuxError::InvalidRequest("transaction without a sender".into()))?;
        let key = signer
            .key_for(from)
            .await
            .ok_or_else(|| EthmuxError::UnknownSigner(from.to_string()))?;

        let nonce = self.inner.get_transaction_count(from).await?;
        let chain_id = {
            let mut cached = signer.chain_id.lock().await;
            match *cached {
                Some(id) => id,
                None => {
                    let id = self.inner.get_net_version().await? as u64;
                    *cached = Some(id);
                    id
                }
            }
        };
        let gas_price = match quantity_field(tx, "gasPrice") {
            Some(price) => price,
            None => self.inner.get_gas_price().await?,
        };
        let to = match tx.get("to").and_then(Value::as_str) {
            Some(to) => Some(address_bytes(to)?),
            None => None,
        };
        let data = match tx.get("data").or_else(|| tx.get("input")) {
            Some(Value::String(blob)) => decode_hex(blob).ok_or_else(|| {
                EthmuxError::InvalidRequest(format!("undecodable transaction data {blob:?}"))
            })?,
            _ => Vec::new(),
        };

        let unsigned = LegacyTransaction {
            nonce,
            gas_price,
            gas: quantity_field(tx, "gas").unwrap_or(DEFAULT_GAS),
            to,
            value: quantity_field(tx, "value").unwrap_or(0),
            data,
            chain_id,
        };
        let raw = sign_legacy_transaction(&unsigned, &key)?;
        debug!(client = %self.name(), from, "signed transaction offline");

        let mut replacement = JsonRpcRequest::new("eth_sendRawTransaction", json!([raw]));
        replacement.id = request.id.clone();

        let response = self.inner.post(&replacement, ctx).await?;
        self.learn_from_response(&replacement, &response, ctx).await;
        Ok(response)
    }
}

fn quantity_field(tx: &serde_json::Map<String, Value>, key: &str) -> Option<u128> {
    match tx.get(key)? {
        Value::String(s) => decode_quantity(s),
        Value::Number(n) => n.as_u64().map(u128::from),
        _ => None,
    }
}

fn address_bytes(raw: &str) -> Result<[u8; 20]> {
    let padded = ethmux_common::hex::format_hex_address(raw);
    let bytes = decode_hex(&padded)
        .filter(|b| b.len() == 20)
        .ok_or_else(|| EthmuxError::InvalidRequest(format!("bad address {raw:?}")))?;
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[async_trait]
impl BackendClient for SyncClient {
    fn name(&self) -> String {
        self.inner.name()
    }

    async fn post(
        &self,
        request: &JsonRpcRequest,
        ctx: CallContext<'_>,
    ) -> Result<JsonRpcResponse> {
        if request.method == "eth_getTransactionReceipt" {
            return self.forward_receipt(request, ctx).await;
        }
        if request.method == "eth_sendTransaction" {
            if let Some(signer) = &self.signer {
                return self.forward_signed(signer, request, ctx).await;
            }
        }
        let remapped = self.remap_request(request).await;
        let response = self.inner.post(&remapped, ctx).await?;
        self.learn_from_response(request, &response, ctx).await;
        Ok(response)
    }

    async fn create_account(
        &self,
        balance: u128,
        address: Option<String>,
    ) -> Result<AccountCreation> {
        if let Some(signer) = &self.signer {
            // a provisioning-time seed already ties this master address to
            // one of our keypairs; honor it instead of draining the pool
            if let Some(requested) = &address {
                let seeded = self
                    .maps
                    .lock()
                    .await
                    .translate_scalar(&Value::String(requested.clone()));
                if let Some(Value::String(existing)) = seeded {
                    if signer.key_for(&existing).await.is_some() {
                        return Ok(AccountCreation::Created(existing));
                    }
                }
            }
            let assigned = signer.assign_next().await?;
            if let Some(requested) = &address {
                self.maps.lock().await.record_address(requested, &assigned);
            }
            return Ok(AccountCreation::Created(assigned));
        }

        // First see if the client can honor the request as-is.
        match self.inner.create_account(balance, address.clone()).await? {
            AccountCreation::Created(created) => Ok(AccountCreation::Created(created)),
            AccountCreation::Unsupported => {
                let Some(requested) = address else {
                    return Ok(AccountCreation::Unsupported);
                };
                // Fall back to an auto-generated address and remember the
                // correspondence.
                match self.inner.create_account(balance, None).await? {
                    AccountCreation::Created(created) => {
                        self.maps.lock().await.record_address(&requested, &created);
                        Ok(AccountCreation::Created(created))
                    }
                    AccountCreation::Unsupported => Ok(AccountCreation::Unsupported),
                }
            }
        }
    }

    async fn is_running(&self) -> bool {
        self.inner.is_running().await
    }

    async fn wait_until_running(&self) {
        self.inner.wait_until_running().await
    }

    async fn wait_for_transaction(&self, tx_hash: &str) -> Result<JsonRpcResponse> {
        // the hash is in the master's namespace; cross into ours first
        let translated = self
            .maps
            .lock()
            .await
            .translate_scalar(&Value::String(tx_hash.to_string()));
        let local_hash = match &translated {
            Some(Value::String(mapped)) => mapped.clone(),
            _ => tx_hash.to_string(),
        };
        self.inner.wait_for_transaction(&local_hash).await
    }

    async fn shutdown(&self) {
        self.inner.shutdown().await
    }
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("inner", &self.inner)
            .field("raw_signing", &self.signer.is_some())
            .finish()
    }
}
