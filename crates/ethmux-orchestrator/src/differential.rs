//! The differential tester plugin.
//!
//! Watches every dispatched request's outcome list and records agreements
//! and divergences between the master and the secondaries. Three checks run,
//! each under its own test name:
//!
//! - `JSON_RPC_ERRORS`: did some backends error while others succeeded?
//! - `CONTRACT_CREATION`: did every backend's receipt report a created
//!   contract when the master's did?
//! - `GAS_USAGE`: did every backend burn exactly the master's gas?
//!
//! A divergence is recorded and logged, never surfaced to the caller; the
//! master's result still flows back unchanged.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use ethmux_common::hex::canonicalize;
use ethmux_common::protocol::{ClientResult, JsonRpcRequest};
use ethmux_common::receipt::{contract_address, gas_used};

use crate::orchestrator::Orchestrator;
use crate::plugin::Plugin;

pub const JSON_RPC_ERRORS: &str = "JSON_RPC_ERRORS";
pub const CONTRACT_CREATION: &str = "CONTRACT_CREATION";
pub const GAS_USAGE: &str = "GAS_USAGE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Fail,
}

/// One recorded check.
#[derive(Debug, Clone)]
pub struct DifferentialTest {
    pub outcome: Outcome,
    pub message: String,
}

#[derive(Default)]
struct Ledger {
    /// test name -> every recorded outcome, in order
    tests: HashMap<String, Vec<DifferentialTest>>,
    /// canonical hash -> hash as the master returned it, for transactions
    /// whose receipts have not been observed yet
    in_flight: HashMap<String, String>,
    /// canonical hash -> the original transaction payload, echoed into
    /// gas-divergence failures
    transactions: HashMap<String, Value>,
    summarized: bool,
}

pub struct DifferentialTester {
    ledger: Mutex<Ledger>,
}

impl DifferentialTester {
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// A snapshot of every recorded test, keyed by test name.
    pub async fn recorded(&self) -> HashMap<String, Vec<DifferentialTest>> {
        self.ledger.lock().await.tests.clone()
    }

    async fn record(&self, test: &str, outcome: Outcome, message: String) {
        match outcome {
            Outcome::Pass => info!(test, "PASS"),
            Outcome::Fail => error!(test, %message, "FAIL"),
        }
        self.ledger
            .lock()
            .await
            .tests
            .entry(test.to_string())
            .or_default()
            .push(DifferentialTest { outcome, message });
    }

    /// The error-partition check. Returns whether any backend erred, in
    /// which case the remaining checks are skipped for this call.
    async fn check_errors(
        &self,
        request: &JsonRpcRequest,
        results: &[ClientResult],
    ) -> bool {
        let failures: Vec<String> = results
            .iter()
            .filter_map(ClientResult::failure)
            .map(|f| f.to_string())
            .collect();
        if failures.is_empty() {
            self.record(
                JSON_RPC_ERRORS,
                Outcome::Pass,
                format!("no errors for {}", request.method),
            )
            .await;
            return false;
        }
        if failures.len() == results.len() {
            // every backend agreed the call is an error
            self.record(
                JSON_RPC_ERRORS,
                Outcome::Pass,
                format!("all backends errored for {}", request.method),
            )
            .await;
        } else {
            self.record(
                JSON_RPC_ERRORS,
                Outcome::Fail,
                format!(
                    "{} of {} backends errored for {}: {}",
                    failures.len(),
                    results.len(),
                    request.method,
                    failures.join("; ")
                ),
            )
            .await;
        }
        true
    }

    async fn track_transaction(&self, request: &JsonRpcRequest, results: &[ClientResult]) {
        let Some(Value::String(hash)) = results[0].result_value() else {
            return;
        };
        let Some(key) = canonicalize(hash) else {
            return;
        };
        let mut ledger = self.ledger.lock().await;
        ledger.in_flight.insert(key.clone(), hash.clone());
        if let Some(tx) = request.params.as_ref().and_then(|p| p.get(0)) {
            ledger.transactions.insert(key, tx.clone());
        }
    }

    async fn check_receipt(
        &self,
        orchestrator: &Orchestrator,
        request: &JsonRpcRequest,
        results: &[ClientResult],
    ) {
        let Some(master_receipt) = results[0].result_value() else {
            return;
        };
        if !master_receipt.is_object() {
            return;
        }

        let original_tx = {
            let mut ledger = self.ledger.lock().await;
            let key = request
                .params
                .as_ref()
                .and_then(|p| p.get(0))
                .and_then(Value::as_str)
                .and_then(canonicalize);
            match key {
                Some(key) => {
                    ledger.in_flight.remove(&key);
                    ledger.transactions.remove(&key)
                }
                None => None,
            }
        };

        let names = orchestrator.client_names().await;
        let name_of = |index: usize| -> String {
            names
                .get(index)
                .cloned()
                .unwrap_or_else(|| format!("client {index}"))
        };

        if contract_address(master_receipt).is_some() {
            for (index, result) in results.iter().enumerate().skip(1) {
                let Some(receipt) = result.result_value() else {
                    continue;
                };
                if contract_address(receipt).is_none() {
                    self.record(
                        CONTRACT_CREATION,
                        Outcome::Fail,
                        format!(
                            "{} did not report a created contract; master receipt: {}",
                            name_of(index),
                            master_receipt
                        ),
                    )
                    .await;
                } else {
                    self.record(
                        CONTRACT_CREATION,
                        Outcome::Pass,
                        format!("{} reported a created contract", name_of(index)),
                    )
                    .await;
                }
            }
        }

        if let Some(master_gas) = gas_used(master_receipt) {
            for (index, result) in results.iter().enumerate().skip(1) {
                let Some(receipt) = result.result_value() else {
                    continue;
                };
                match gas_used(receipt) {
                    Some(gas) if gas == master_gas => {
                        self.record(
                            GAS_USAGE,
                            Outcome::Pass,
                            format!("{} used 0x{gas:x} gas, matching the master", name_of(index)),
                        )
                        .await;
                    }
                    Some(gas) => {
                        let tx = original_tx
                            .as_ref()
                            .map(Value::to_string)
                            .unwrap_or_else(|| "<unknown>".into());
                        self.record(
                            GAS_USAGE,
                            Outcome::Fail,
                            format!(
                                "{} used 0x{gas:x} gas but the master used 0x{master_gas:x} \
                                 for transaction {tx}",
                                name_of(index)
                            ),
                        )
                        .await;
                    }
                    None => {}
                }
            }
        }
    }
}

impl Default for DifferentialTester {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for DifferentialTester {
    fn name(&self) -> String {
        "DifferentialTester".to_string()
    }

    async fn after_post(
        &self,
        orchestrator: &Orchestrator,
        request: &JsonRpcRequest,
        results: &[ClientResult],
    ) {
        if results.is_empty() {
            return;
        }
        if self.check_errors(request, results).await {
            return;
        }
        match request.method.as_str() {
            "eth_sendTransaction" | "eth_sendRawTransaction" => {
                self.track_transaction(request, results).await;
            }
            "eth_getTransactionReceipt" => {
                self.check_receipt(orchestrator, request, results).await;
            }
            _ => {}
        }
    }

    /// Drains the in-flight set: each pending transaction's receipt is
    /// fetched through the orchestrator, which re-enters `after_post` and
    /// runs the receipt checks.
    async fn finalize(&self, orchestrator: &Orchestrator) {
        let pending: Vec<String> = self
            .ledger
            .lock()
            .await
            .in_flight
            .values()
            .cloned()
            .collect();
        for hash in pending {
            info!(%hash, "draining pending transaction");
            let request = JsonRpcRequest::new("eth_getTransactionReceipt", json!([hash]));
            orchestrator.post(&request).await;
        }
        let mut ledger = self.ledger.lock().await;
        if !ledger.in_flight.is_empty() {
            warn!(
                count = ledger.in_flight.len(),
                "transactions still unresolved after the drain"
            );
            ledger.in_flight.clear();
        }
    }

    async fn shutdown(&self, orchestrator: &Orchestrator) {
        self.finalize(orchestrator).await;

        let mut ledger = self.ledger.lock().await;
        if ledger.summarized {
            return;
        }
        ledger.summarized = true;

        let mut names: Vec<&String> = ledger.tests.keys().collect();
        names.sort();
        info!("differential test summary:");
        for name in names {
            let tests = &ledger.tests[name];
            let passed = tests
                .iter()
                .filter(|t| t.outcome == Outcome::Pass)
                .count();
            info!("  {name}: {passed}/{} passed", tests.len());
        }
    }
}
