//! Dispatch, plugin, and differential-testing behavior against in-process
//! mock backends.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::post;
use axum::Json;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use ethmux_client::RpcHttpClient;
use ethmux_common::protocol::{ClientResult, JsonRpcRequest};
use ethmux_orchestrator::differential::{
    DifferentialTester, Outcome, CONTRACT_CREATION, GAS_USAGE, JSON_RPC_ERRORS,
};
use ethmux_orchestrator::{Orchestrator, Plugin, PluginAction};
use ethmux_sync::SyncClient;

struct MockState {
    script: Mutex<HashMap<String, VecDeque<Value>>>,
    seen: Mutex<Vec<Value>>,
}

struct MockBackend {
    addr: SocketAddr,
    state: Arc<MockState>,
}

impl MockBackend {
    async fn spawn() -> Self {
        let state = Arc::new(MockState {
            script: Mutex::new(HashMap::new()),
            seen: Mutex::new(Vec::new()),
        });

        async fn handle(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Json<Value> {
            state.seen.lock().await.push(body.clone());
            let method = body["method"].as_str().unwrap_or_default().to_string();
            let id = body.get("id").cloned().unwrap_or(Value::Null);
            let payload = state
                .script
                .lock()
                .await
                .get_mut(&method)
                .and_then(VecDeque::pop_front)
                .unwrap_or(json!({"result": null}));
            let mut response = json!({"jsonrpc": "2.0", "id": id});
            if let Some(obj) = payload.as_object() {
                for (k, v) in obj {
                    response[k] = v.clone();
                }
            }
            Json(response)
        }

        let app = axum::Router::new()
            .route("/", post(handle))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    fn client(&self, name: &str) -> RpcHttpClient {
        RpcHttpClient::new(self.url())
            .with_name(name)
            .with_receipt_poll(Duration::from_millis(10))
    }

    async fn script(&self, method: &str, payloads: Vec<Value>) {
        self.state
            .script
            .lock()
            .await
            .insert(method.to_string(), payloads.into());
    }

    async fn seen(&self) -> Vec<Value> {
        self.state.seen.lock().await.clone()
    }

    async fn seen_methods(&self) -> Vec<String> {
        self.seen()
            .await
            .iter()
            .filter_map(|r| r["method"].as_str().map(str::to_string))
            .collect()
    }
}

/// Records every after_post invocation's method and result count.
#[derive(Default)]
struct Recorder {
    fired: Mutex<Vec<(String, usize)>>,
}

#[async_trait]
impl Plugin for Recorder {
    fn name(&self) -> String {
        "Recorder".to_string()
    }

    async fn after_post(
        &self,
        _orchestrator: &Orchestrator,
        request: &JsonRpcRequest,
        results: &[ClientResult],
    ) {
        self.fired
            .lock()
            .await
            .push((request.method.clone(), results.len()));
    }
}

struct Dropper;

#[async_trait]
impl Plugin for Dropper {
    fn name(&self) -> String {
        "Dropper".to_string()
    }

    async fn before_post(
        &self,
        _orchestrator: &Orchestrator,
        _request: &JsonRpcRequest,
    ) -> PluginAction {
        PluginAction::Drop
    }
}

struct Redirector;

#[async_trait]
impl Plugin for Redirector {
    fn name(&self) -> String {
        "Redirector".to_string()
    }

    async fn before_post(
        &self,
        _orchestrator: &Orchestrator,
        request: &JsonRpcRequest,
    ) -> PluginAction {
        if request.method == "eth_blockNumber" {
            PluginAction::Replace(JsonRpcRequest::bare("net_version"))
        } else {
            PluginAction::Unchanged
        }
    }
}

/// One master, one synchronized secondary, and a differential tester.
async fn differential_setup() -> (Orchestrator, Arc<DifferentialTester>, MockBackend, MockBackend) {
    let master = MockBackend::spawn().await;
    let secondary = MockBackend::spawn().await;
    let orchestrator = Orchestrator::new();
    orchestrator
        .set_master_client(Arc::new(master.client("master")))
        .await
        .unwrap();
    orchestrator
        .add_client(Arc::new(
            SyncClient::new(secondary.client("secondary"))
                .with_receipt_poll(Duration::from_millis(10)),
        ))
        .await;
    let tester = Arc::new(DifferentialTester::new());
    orchestrator.add_plugin(tester.clone()).await;
    (orchestrator, tester, master, secondary)
}

fn outcomes(tests: &HashMap<String, Vec<ethmux_orchestrator::DifferentialTest>>, name: &str) -> Vec<Outcome> {
    tests
        .get(name)
        .map(|t| t.iter().map(|t| t.outcome).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn master_result_is_canonical_and_plugins_see_every_backend() {
    let master = MockBackend::spawn().await;
    let secondary = MockBackend::spawn().await;
    master
        .script("eth_getBalance", vec![json!({"result": "0x64"})])
        .await;

    let orchestrator = Orchestrator::new();
    orchestrator
        .set_master_client(Arc::new(master.client("master")))
        .await
        .unwrap();
    orchestrator
        .add_client(Arc::new(secondary.client("secondary")))
        .await;
    let recorder = Arc::new(Recorder::default());
    orchestrator.add_plugin(recorder.clone()).await;

    let request = JsonRpcRequest::new("eth_getBalance", json!(["0x1", "latest"]));
    let result = orchestrator.post(&request).await;
    assert_eq!(result.result_value(), Some(&json!("0x64")));

    // the secondary was asked too, and after_post saw [master, secondary]
    assert!(secondary.seen_methods().await.contains(&"eth_getBalance".to_string()));
    let fired = recorder.fired.lock().await.clone();
    assert_eq!(fired, vec![("eth_getBalance".to_string(), 2)]);
}

#[tokio::test]
async fn no_master_still_asks_secondaries_but_returns_absent() {
    let secondary = MockBackend::spawn().await;
    let orchestrator = Orchestrator::new();
    orchestrator
        .add_client(Arc::new(secondary.client("secondary")))
        .await;
    let recorder = Arc::new(Recorder::default());
    orchestrator.add_plugin(recorder.clone()).await;

    let result = orchestrator.post(&JsonRpcRequest::bare("net_version")).await;
    assert!(result.is_absent());
    assert_eq!(secondary.seen_methods().await, vec!["net_version"]);
    // no canonical result means no after_post
    assert!(recorder.fired.lock().await.is_empty());
}

#[tokio::test]
async fn dropped_requests_never_reach_a_backend() {
    let master = MockBackend::spawn().await;
    let orchestrator = Orchestrator::new();
    orchestrator
        .set_master_client(Arc::new(master.client("master")))
        .await
        .unwrap();
    orchestrator.add_plugin(Arc::new(Dropper)).await;

    let result = orchestrator.post(&JsonRpcRequest::bare("net_version")).await;
    assert!(result.is_absent());
    // only the eth_accounts fetch from attaching the master reached the wire
    assert!(!master
        .seen_methods()
        .await
        .contains(&"net_version".to_string()));
}

#[tokio::test]
async fn plugins_can_replace_the_request() {
    let master = MockBackend::spawn().await;
    master
        .script("net_version", vec![json!({"result": "1337"})])
        .await;
    let orchestrator = Orchestrator::new();
    orchestrator
        .set_master_client(Arc::new(master.client("master")))
        .await
        .unwrap();
    orchestrator.add_plugin(Arc::new(Redirector)).await;

    let result = orchestrator
        .post(&JsonRpcRequest::bare("eth_blockNumber"))
        .await;
    assert_eq!(result.result_value(), Some(&json!("1337")));
    let methods = master.seen_methods().await;
    assert!(methods.contains(&"net_version".to_string()));
    assert!(!methods.contains(&"eth_blockNumber".to_string()));
}

#[tokio::test]
async fn a_second_master_is_rejected() {
    let master = MockBackend::spawn().await;
    let orchestrator = Orchestrator::new();
    orchestrator
        .set_master_client(Arc::new(master.client("first")))
        .await
        .unwrap();
    let err = orchestrator
        .set_master_client(Arc::new(master.client("second")))
        .await;
    assert!(err.is_err());
}

#[tokio::test]
async fn master_accounts_are_back_filled_into_secondaries() {
    let master = MockBackend::spawn().await;
    master
        .script("eth_accounts", vec![json!({"result": ["0xaa"]})])
        .await;
    master
        .script("eth_getBalance", vec![json!({"result": "0x64"})])
        .await;
    let secondary = MockBackend::spawn().await;
    secondary
        .script("eth_accounts", vec![json!({"result": ["0xcc"]})])
        .await;

    let orchestrator = Orchestrator::new();
    orchestrator
        .set_master_client(Arc::new(master.client("master")))
        .await
        .unwrap();
    assert_eq!(orchestrator.accounts().await, vec!["0xaa"]);
    orchestrator
        .add_client(Arc::new(SyncClient::new(secondary.client("secondary"))))
        .await;

    // the master-namespace account now routes to the secondary's own account
    let request = JsonRpcRequest::new("eth_getBalance", json!(["0xaa", "latest"]));
    orchestrator.post(&request).await;
    let last = secondary.seen().await.last().unwrap().clone();
    let wire_addr = last["params"][0].as_str().unwrap().to_string();
    assert!(wire_addr.ends_with("cc"));
    assert_ne!(wire_addr, "0xaa");
}

#[tokio::test]
async fn error_partition_records_a_differential_fail() {
    let (orchestrator, tester, master, _secondary) = differential_setup().await;
    master
        .script(
            "eth_call",
            vec![json!({"error": {"code": -32000, "message": "revert"}})],
        )
        .await;

    let request = JsonRpcRequest::new("eth_call", json!([{"to": "0x2"}, "latest"]));
    orchestrator.post(&request).await;

    let tests = tester.recorded().await;
    assert_eq!(outcomes(&tests, JSON_RPC_ERRORS), vec![Outcome::Fail]);
    let message = &tests[JSON_RPC_ERRORS][0].message;
    assert!(message.contains("eth_call"));
    assert!(message.contains("revert"));
}

#[tokio::test]
async fn matching_gas_usage_records_a_pass() {
    let (orchestrator, tester, master, secondary) = differential_setup().await;
    master
        .script("eth_sendTransaction", vec![json!({"result": "0x4a5"})])
        .await;
    master
        .script(
            "eth_getTransactionReceipt",
            vec![json!({"result": {"status": "0x1", "gasUsed": "0x5208"}})],
        )
        .await;
    secondary
        .script("eth_sendTransaction", vec![json!({"result": "0x5ec"})])
        .await;
    secondary
        .script(
            "eth_getTransactionReceipt",
            vec![json!({"result": {"status": "0x1", "gasUsed": "0x5208"}})],
        )
        .await;

    let send = JsonRpcRequest::new("eth_sendTransaction", json!([{"from": "0x1", "to": "0x2"}]));
    orchestrator.post(&send).await;
    let receipt = JsonRpcRequest::new("eth_getTransactionReceipt", json!(["0x4a5"]));
    orchestrator.post(&receipt).await;

    let tests = tester.recorded().await;
    assert_eq!(outcomes(&tests, GAS_USAGE), vec![Outcome::Pass]);
}

#[tokio::test]
async fn bare_secondary_receipts_block_until_mined() {
    let master = MockBackend::spawn().await;
    let secondary = MockBackend::spawn().await;
    master
        .script("eth_sendTransaction", vec![json!({"result": "0x4a5"})])
        .await;
    master
        .script(
            "eth_getTransactionReceipt",
            vec![json!({"result": {"status": "0x1", "gasUsed": "0x5208"}})],
        )
        .await;
    secondary
        .script("eth_sendTransaction", vec![json!({"result": "0x5ec"})])
        .await;
    // still pending on the first poll
    secondary
        .script(
            "eth_getTransactionReceipt",
            vec![
                json!({"result": null}),
                json!({"result": {"status": "0x1", "gasUsed": "0x5208"}}),
            ],
        )
        .await;

    let orchestrator = Orchestrator::new();
    orchestrator
        .set_master_client(Arc::new(master.client("master")))
        .await
        .unwrap();
    orchestrator
        .add_client(Arc::new(secondary.client("secondary")))
        .await;
    let tester = Arc::new(DifferentialTester::new());
    orchestrator.add_plugin(tester.clone()).await;

    let send = JsonRpcRequest::new("eth_sendTransaction", json!([{"from": "0x1", "to": "0x2"}]));
    orchestrator.post(&send).await;
    let receipt = JsonRpcRequest::new("eth_getTransactionReceipt", json!(["0x4a5"]));
    orchestrator.post(&receipt).await;

    // the pending null was polled out before the plugins saw the results
    let receipt_calls = secondary
        .seen_methods()
        .await
        .iter()
        .filter(|m| *m == "eth_getTransactionReceipt")
        .count();
    assert_eq!(receipt_calls, 2);
    let tests = tester.recorded().await;
    assert_eq!(outcomes(&tests, GAS_USAGE), vec![Outcome::Pass]);
}

#[tokio::test]
async fn gas_divergence_records_a_fail_with_both_values() {
    let (orchestrator, tester, master, secondary) = differential_setup().await;
    master
        .script("eth_sendTransaction", vec![json!({"result": "0x4a5"})])
        .await;
    master
        .script(
            "eth_getTransactionReceipt",
            vec![json!({"result": {"status": "0x1", "gasUsed": "0x5208"}})],
        )
        .await;
    secondary
        .script("eth_sendTransaction", vec![json!({"result": "0x5ec"})])
        .await;
    secondary
        .script(
            "eth_getTransactionReceipt",
            vec![json!({"result": {"status": "0x1", "gasUsed": "0x5210"}})],
        )
        .await;

    let send = JsonRpcRequest::new(
        "eth_sendTransaction",
        json!([{"from": "0x1", "to": "0x2", "value": "0x9"}]),
    );
    orchestrator.post(&send).await;
    let receipt = JsonRpcRequest::new("eth_getTransactionReceipt", json!(["0x4a5"]));
    orchestrator.post(&receipt).await;

    let tests = tester.recorded().await;
    assert_eq!(outcomes(&tests, GAS_USAGE), vec![Outcome::Fail]);
    let message = &tests[GAS_USAGE][0].message;
    // both gas values and the original transaction are echoed
    assert!(message.contains("0x5208"));
    assert!(message.contains("0x5210"));
    assert!(message.contains("\"value\":\"0x9\""));
}

#[tokio::test]
async fn contract_creation_is_checked_and_addresses_pair() {
    let master_contract = format!("0x{}", "aa".repeat(20));
    let secondary_contract = format!("0x{}", "bb".repeat(20));
    let (orchestrator, tester, master, secondary) = differential_setup().await;
    master
        .script("eth_sendTransaction", vec![json!({"result": "0x4a5"})])
        .await;
    master
        .script(
            "eth_getTransactionReceipt",
            vec![json!({"result": {
                "status": "0x1",
                "contractAddress": master_contract,
                "gasUsed": "0x100"
            }})],
        )
        .await;
    secondary
        .script("eth_sendTransaction", vec![json!({"result": "0x5ec"})])
        .await;
    secondary
        .script(
            "eth_getTransactionReceipt",
            vec![json!({"result": {
                "status": "0x1",
                "contractAddress": secondary_contract,
                "gasUsed": "0x100"
            }})],
        )
        .await;

    let send = JsonRpcRequest::new("eth_sendTransaction", json!([{"from": "0x1", "data": "0x60"}]));
    orchestrator.post(&send).await;
    let receipt = JsonRpcRequest::new("eth_getTransactionReceipt", json!(["0x4a5"]));
    orchestrator.post(&receipt).await;

    let tests = tester.recorded().await;
    assert_eq!(outcomes(&tests, CONTRACT_CREATION), vec![Outcome::Pass]);

    // a later call against the master's contract reaches the secondary in
    // its own namespace, while the master sees it untouched
    let call = JsonRpcRequest::new("eth_call", json!([{"to": master_contract, "data": "0x"}, "latest"]));
    orchestrator.post(&call).await;
    let master_last = master.seen().await.last().unwrap().clone();
    assert_eq!(master_last["params"][0]["to"], json!(master_contract));
    let secondary_last = secondary.seen().await.last().unwrap().clone();
    assert_eq!(secondary_last["params"][0]["to"], json!(secondary_contract));
}

#[tokio::test]
async fn removing_the_tester_drains_pending_transactions() {
    let (orchestrator, tester, master, secondary) = differential_setup().await;
    master
        .script("eth_sendTransaction", vec![json!({"result": "0x4a5"})])
        .await;
    master
        .script(
            "eth_getTransactionReceipt",
            vec![json!({"result": {"status": "0x1", "gasUsed": "0x5208"}})],
        )
        .await;
    secondary
        .script("eth_sendTransaction", vec![json!({"result": "0x5ec"})])
        .await;
    secondary
        .script(
            "eth_getTransactionReceipt",
            vec![json!({"result": {"status": "0x1", "gasUsed": "0x5208"}})],
        )
        .await;

    let send = JsonRpcRequest::new("eth_sendTransaction", json!([{"from": "0x1", "to": "0x2"}]));
    orchestrator.post(&send).await;
    // no explicit receipt call: the drain on shutdown must fetch it
    assert!(orchestrator.remove_plugin("DifferentialTester").await);

    assert!(master
        .seen_methods()
        .await
        .contains(&"eth_getTransactionReceipt".to_string()));
    let tests = tester.recorded().await;
    assert_eq!(outcomes(&tests, GAS_USAGE), vec![Outcome::Pass]);
}

#[tokio::test]
async fn deploy_contract_returns_the_created_address() {
    let master = MockBackend::spawn().await;
    master
        .script("eth_sendTransaction", vec![json!({"result": "0x4a5"})])
        .await;
    master
        .script(
            "eth_getTransactionReceipt",
            vec![json!({"result": {"status": "0x1", "contractAddress": "0xc0ffee"}})],
        )
        .await;
    let orchestrator = Orchestrator::new();
    orchestrator
        .set_master_client(Arc::new(master.client("master")))
        .await
        .unwrap();

    let deployed = orchestrator
        .deploy_contract("0x1", "0x6060", 1_000_000)
        .await
        .unwrap();
    assert_eq!(deployed.as_deref(), Some("0xc0ffee"));
}

#[tokio::test]
async fn estimate_gas_falls_back_to_the_next_backend() {
    let master = MockBackend::spawn().await;
    master
        .script(
            "eth_estimateGas",
            vec![json!({"error": {"code": -32000, "message": "no"}})],
        )
        .await;
    let secondary = MockBackend::spawn().await;
    secondary
        .script("eth_estimateGas", vec![json!({"result": "0x5208"})])
        .await;

    let orchestrator = Orchestrator::new();
    orchestrator
        .set_master_client(Arc::new(master.client("master")))
        .await
        .unwrap();
    orchestrator
        .add_client(Arc::new(secondary.client("secondary")))
        .await;

    let estimate = orchestrator
        .estimate_gas(&json!({"from": "0x1", "to": "0x2"}))
        .await
        .unwrap();
    assert_eq!(estimate, 21000);
}
