//! End-to-end tests for the synchronizing decorator against an in-process
//! mock backend.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::Json;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use ethmux_client::{AccountCreation, BackendClient, CallContext, RpcHttpClient};
use ethmux_common::protocol::{ClientResult, JsonRpcRequest, JsonRpcResponse};
use ethmux_sync::{RawSigner, SyncClient};

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
}

fn sync_for(backend: &MockBackend) -> SyncClient {
    SyncClient::new(RpcHttpClient::new(backend.url()).with_name("secondary"))
        .with_receipt_poll(Duration::from_millis(10))
}

fn master_result(result: Value) -> ClientResult {
    ClientResult::Response(JsonRpcResponse::success(None, result))
}

#[tokio::test]
async fn create_account_falls_back_and_learns_the_mapping() {
    let backend = MockBackend::spawn().await;
    backend
        .script("eth_accounts", vec![json!({"result": ["0xcc"]})])
        .await;
    let client = sync_for(&backend);

    // the backend cannot mint 0xAA specifically, so it hands out its own
    let created = client
        .create_account(0, Some("0xaa".into()))
        .await
        .unwrap();
    let AccountCreation::Created(actual) = created else {
        panic!("expected fallback creation");
    };
    assert!(actual.ends_with("cc"));

    // a later call phrased against 0xAA reaches the wire as the fallback
    let call = JsonRpcRequest::new("eth_getBalance", json!(["0xaa", "latest"]));
    client.post(&call, CallContext::default()).await.unwrap();
    let seen = backend.seen().await;
    let balance_call = seen.last().unwrap();
    assert_eq!(balance_call["params"][0], json!(actual));
}

#[tokio::test]
async fn transaction_hashes_pair_and_receipts_translate() {
    let backend = MockBackend::spawn().await;
    backend
        .script("eth_sendTransaction", vec![json!({"result": "0x5ec"})])
        .await;
    let client = sync_for(&backend);

    // master minted 0x4a5 for the logically-same transaction
    let master = master_result(json!("0x4a5"));
    let send = JsonRpcRequest::new("eth_sendTransaction", json!([{"to": "0x1", "value": "0x1"}]));
    client
        .post(&send, CallContext::with_master(&master))
        .await
        .unwrap();

    // polling the receipt by the master's hash hits the wire with ours
    let master_receipt = master_result(json!({"status": "0x1", "gasUsed": "0x5208"}));
    let receipt_req = JsonRpcRequest::new("eth_getTransactionReceipt", json!(["0x4a5"]));
    backend
        .script(
            "eth_getTransactionReceipt",
            vec![json!({"result": {"status": "0x1", "gasUsed": "0x5208"}})],
        )
        .await;
    client
        .post(&receipt_req, CallContext::with_master(&master_receipt))
        .await
        .unwrap();

    let seen = backend.seen().await;
    let receipt_call = seen.last().unwrap();
    assert_eq!(receipt_call["method"], json!("eth_getTransactionReceipt"));
    assert_eq!(receipt_call["params"][0], json!("0x5ec"));
}

#[tokio::test]
async fn contract_addresses_pair_across_backends() {
    let master_contract = format!("0x{}", "aa".repeat(20));
    let secondary_contract = format!("0x{}", "bb".repeat(20));

    let backend = MockBackend::spawn().await;
    backend
        .script(
            "eth_getTransactionReceipt",
            vec![json!({"result": {
                "status": "0x1",
                "contractAddress": secondary_contract,
                "gasUsed": "0x100"
            }})],
        )
        .await;
    let client = sync_for(&backend);

    let master_receipt = master_result(json!({
        "status": "0x1",
        "contractAddress": master_contract,
        "gasUsed": "0x100"
    }));
    let receipt_req = JsonRpcRequest::new("eth_getTransactionReceipt", json!(["0xd00d"]));
    client
        .post(&receipt_req, CallContext::with_master(&master_receipt))
        .await
        .unwrap();

    // a call against the master's contract address reaches the wire in
    // this backend's namespace
    let call = JsonRpcRequest::new(
        "eth_call",
        json!([{"to": master_contract, "data": "0x"}, "latest"]),
    );
    client.post(&call, CallContext::default()).await.unwrap();
    let seen = backend.seen().await;
    assert_eq!(seen.last().unwrap()["params"][0]["to"], json!(secondary_contract));
}

#[tokio::test]
async fn failed_master_receipt_short_circuits() {
    let backend = MockBackend::spawn().await;
    let client = sync_for(&backend);

    let master_receipt = master_result(json!({"status": "0x0"}));
    let receipt_req = JsonRpcRequest::new("eth_getTransactionReceipt", json!(["0xdead"]));
    let response = client
        .post(&receipt_req, CallContext::with_master(&master_receipt))
        .await
        .unwrap();

    // the master's result came straight back and the wire stayed silent
    assert_eq!(response.result_value().unwrap()["status"], json!("0x0"));
    assert!(backend.seen().await.is_empty());
}

#[tokio::test]
async fn receipt_polls_until_the_secondary_mines() {
    let backend = MockBackend::spawn().await;
    backend
        .script(
            "eth_getTransactionReceipt",
            vec![
                json!({"result": null}),
                json!({"result": {"status": "0x1"}}),
            ],
        )
        .await;
    let client = sync_for(&backend);

    let master_receipt = master_result(json!({"status": "0x1"}));
    let receipt_req = JsonRpcRequest::new("eth_getTransactionReceipt", json!(["0xd00d"]));
    let response = client
        .post(&receipt_req, CallContext::with_master(&master_receipt))
        .await
        .unwrap();
    assert_eq!(response.result_value().unwrap()["status"], json!("0x1"));
    assert_eq!(backend.seen().await.len(), 2);
}

#[tokio::test]
async fn filter_ids_are_learned_and_dropped() {
    let backend = MockBackend::spawn().await;
    backend
        .script("eth_newBlockFilter", vec![json!({"result": "0x9"})])
        .await;
    backend
        .script("eth_uninstallFilter", vec![json!({"result": true})])
        .await;
    let client = sync_for(&backend);

    // the master handed the caller filter id 0x1; ours is 0x9
    let master = master_result(json!("0x1"));
    let new_filter = JsonRpcRequest::bare("eth_newBlockFilter");
    client
        .post(&new_filter, CallContext::with_master(&master))
        .await
        .unwrap();

    let changes = JsonRpcRequest::new("eth_getFilterChanges", json!(["0x1"]));
    client.post(&changes, CallContext::default()).await.unwrap();
    assert_eq!(backend.seen().await.last().unwrap()["params"][0], json!("0x9"));

    let uninstall = JsonRpcRequest::new("eth_uninstallFilter", json!(["0x1"]));
    client.post(&uninstall, CallContext::default()).await.unwrap();
    assert_eq!(backend.seen().await.last().unwrap()["params"][0], json!("0x9"));

    // the mapping is gone; the id now passes through untranslated
    let stale = JsonRpcRequest::new("eth_getFilterChanges", json!(["0x1"]));
    client.post(&stale, CallContext::default()).await.unwrap();
    assert_eq!(backend.seen().await.last().unwrap()["params"][0], json!("0x1"));
}

#[tokio::test]
async fn seeded_accounts_keep_their_declared_keys() {
    let backend = MockBackend::spawn().await;
    let signer = RawSigner::new();
    signer
        .add_key(ethmux_sync::parse_private_key(&format!("0x{:064x}", 1)).unwrap())
        .await;
    signer
        .add_key(ethmux_sync::parse_private_key(&format!("0x{:064x}", 2)).unwrap())
        .await;
    let client = SyncClient::new(RpcHttpClient::new(backend.url()).with_name("raw"))
        .with_signer(signer);

    let key_one_addr = "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf";
    let key_two_addr = "0x2b5ad5c4795c026514f8317c7a215e218dccd6cf";
    // declared cross-wise against pool order
    client.seed_address("0xaa", key_two_addr).await;
    client.seed_address("0xbb", key_one_addr).await;

    let AccountCreation::Created(first) =
        client.create_account(0, Some("0xaa".into())).await.unwrap()
    else {
        panic!("expected a keyed account");
    };
    assert_eq!(first, key_two_addr);
    let AccountCreation::Created(second) =
        client.create_account(0, Some("0xbb".into())).await.unwrap()
    else {
        panic!("expected a keyed account");
    };
    assert_eq!(second, key_one_addr);
}

#[tokio::test]
async fn raw_signing_replaces_send_transaction() {
    let backend = MockBackend::spawn().await;
    backend
        .script("eth_getTransactionCount", vec![json!({"result": "0x0"})])
        .await;
    backend
        .script("net_version", vec![json!({"result": "1337"})])
        .await;
    backend
        .script("eth_sendRawTransaction", vec![json!({"result": "0x7a11"})])
        .await;

    let signer = RawSigner::new();
    signer
        .add_key(ethmux_sync::parse_private_key(&format!("0x{:064x}", 1)).unwrap())
        .await;
    let client = SyncClient::new(RpcHttpClient::new(backend.url()).with_name("raw"))
        .with_signer(signer)
        .with_receipt_poll(Duration::from_millis(10));

    // provisioning: the master-space account 0xAA is backed by our keypair
    let created = client.create_account(0, Some("0xaa".into())).await.unwrap();
    let AccountCreation::Created(local) = created else {
        panic!("expected a pooled account");
    };
    assert_eq!(local, "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf");

    let master = master_result(json!("0x4a5"));
    let send = JsonRpcRequest::new(
        "eth_sendTransaction",
        json!([{"from": "0xaa", "to": "0x2", "value": "0x1", "gas": "0x5208", "gasPrice": "0x1"}]),
    );
    client
        .post(&send, CallContext::with_master(&master))
        .await
        .unwrap();

    let seen = backend.seen().await;
    let raw_call = seen.last().unwrap();
    assert_eq!(raw_call["method"], json!("eth_sendRawTransaction"));
    let raw = raw_call["params"][0].as_str().unwrap();
    assert!(raw.starts_with("0x"));
    assert!(raw.len() > 100);
    // eth_sendTransaction itself never reached the wire
    assert!(seen
        .iter()
        .all(|r| r["method"] != json!("eth_sendTransaction")));

    // and the raw submission's hash paired with the master's
    backend
        .script(
            "eth_getTransactionReceipt",
            vec![json!({"result": {"status": "0x1"}})],
        )
        .await;
    let master_receipt = master_result(json!({"status": "0x1"}));
    let receipt_req = JsonRpcRequest::new("eth_getTransactionReceipt", json!(["0x4a5"]));
    client
        .post(&receipt_req, CallContext::with_master(&master_receipt))
        .await
        .unwrap();
    assert_eq!(
        backend.seen().await.last().unwrap()["params"][0],
        json!("0x7a11")
    );
}
