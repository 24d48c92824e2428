//! # ethmux CLI Entry Point
//!
//! Starts the differential JSON-RPC multiplexer: one master backend whose
//! answers are returned to the caller, any number of secondary backends that
//! replay the same traffic, and plugins observing the per-backend outcomes.
//!
//! ## Usage
//!
//! ```bash
//! # Multiplex a local Ganache (master) against a Geth node
//! ethmux --master http://127.0.0.1:8545 --client http://127.0.0.1:8546
//!
//! # A key-less backend participates via offline signing
//! ethmux --master http://127.0.0.1:8545 \
//!   --raw-client http://remote:8545 \
//!   --account 0xabc...:0x56bc75e2d63100000:0x6cbe...
//!
//! # Capture every inbound request to a JSON file
//! ethmux --master http://127.0.0.1:8545 --export-json calls.json
//! ```
//!
//! ## URL Format
//!
//! All backend URLs must include the `http://` or `https://` prefix.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use argh::FromArgs;

use ethmux_client::{BackendClient, RpcHttpClient};
use ethmux_common::hex::decode_quantity;
use ethmux_orchestrator::{
    DifferentialTester, HttpServer, JsonExporter, JsonRpcExportPlugin, Orchestrator,
};
use ethmux_sync::{derive_address, parse_private_key, RawSigner, SyncClient};

/// Validates that a URL string starts with http:// or https://
fn validate_http_url(url: &str, description: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "Invalid {}: '{}' must start with http:// or https://",
            description,
            url
        ))
    }
}

#[derive(FromArgs)]
/// ethmux - differential JSON-RPC multiplexer for Ethereum clients
struct Cli {
    /// address to bind the JSON-RPC front-end to
    ///
    /// Defaults to "127.0.0.1:8546" so a master on the conventional 8545
    /// can run on the same machine.
    #[argh(option, short = 'b', default = "\"127.0.0.1:8546\".into()")]
    bind: String,

    /// URL of the master backend, whose results are returned to the caller
    ///
    /// Without a master, requests are still replayed against the secondary
    /// backends but every caller receives a null result.
    #[argh(option, short = 'm', long = "master")]
    master: Option<String>,

    /// URL of a secondary backend (repeatable)
    ///
    /// Secondaries replay the master's traffic with addresses, transaction
    /// hashes, and filter ids translated into their own namespace.
    #[argh(option, short = 'c', long = "client")]
    clients: Vec<String>,

    /// URL of a secondary backend with no local accounts (repeatable)
    ///
    /// eth_sendTransaction is signed offline with the keys supplied via
    /// --account and forwarded as eth_sendRawTransaction.
    #[argh(option, long = "raw-client")]
    raw_clients: Vec<String>,

    /// pre-funded account as addr:balance[:privkey] (repeatable)
    ///
    /// The balance is a decimal or 0x-prefixed wei quantity. Tuples with a
    /// private key feed the signing pool used by --raw-client backends.
    #[argh(option, short = 'a', long = "account")]
    accounts: Vec<String>,

    /// chain id for offline signing, overriding the backend's net_version
    #[argh(option, long = "chain-id")]
    chain_id: Option<u64>,

    /// path to stream every inbound request into, as one JSON array
    #[argh(option, long = "export-json")]
    export_json: Option<String>,

    /// disable the differential tester
    #[argh(switch, long = "no-differential")]
    no_differential: bool,
}

/// One parsed `--account addr:balance[:privkey]` tuple.
#[derive(Debug, Clone, PartialEq)]
struct AccountSpec {
    address: String,
    balance: u128,
    private_key: Option<String>,
}

fn parse_account(raw: &str) -> Result<AccountSpec> {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(anyhow::anyhow!(
            "Invalid account '{}': expected addr:balance[:privkey]",
            raw
        ));
    }
    let balance = decode_quantity(parts[1])
        .ok_or_else(|| anyhow::anyhow!("Invalid balance '{}' in account '{}'", parts[1], raw))?;
    Ok(AccountSpec {
        address: parts[0].to_string(),
        balance,
        private_key: parts.get(2).map(|s| s.to_string()),
    })
}

/// Builds a signer holding every keyed account from the tuples, plus the
/// declared-address -> derived-address pairs to seed into the client's
/// identifier map so each master account keeps its declared key.
async fn build_signer(
    accounts: &[AccountSpec],
    chain_id: Option<u64>,
) -> Result<(RawSigner, Vec<(String, String)>)> {
    let signer = RawSigner::new();
    if let Some(id) = chain_id {
        signer.set_chain_id(id).await;
    }
    let mut seeds = Vec::new();
    for spec in accounts {
        if let Some(key) = &spec.private_key {
            let key = parse_private_key(key).map_err(|e| {
                anyhow::anyhow!("Invalid private key for account {}: {}", spec.address, e)
            })?;
            seeds.push((spec.address.clone(), derive_address(&key)));
            signer.add_key(key).await;
        }
    }
    Ok((signer, seeds))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if let Some(master) = &cli.master {
        validate_http_url(master, "master address")?;
    }
    for url in cli.clients.iter().chain(&cli.raw_clients) {
        validate_http_url(url, "client address")?;
    }
    let accounts: Vec<AccountSpec> = cli
        .accounts
        .iter()
        .map(|raw| parse_account(raw))
        .collect::<Result<_>>()?;
    let keyed = accounts.iter().filter(|a| a.private_key.is_some()).count();
    if !cli.raw_clients.is_empty() && keyed == 0 {
        return Err(anyhow::anyhow!(
            "--raw-client requires at least one --account tuple with a private key"
        ));
    }

    let orchestrator = Arc::new(Orchestrator::new());

    if let Some(url) = &cli.master {
        let master = RpcHttpClient::new(url.clone()).with_name("master");
        tracing::info!("Waiting for the master backend at {}", url);
        master.wait_until_running().await;
        orchestrator.set_master_client(Arc::new(master)).await?;
    } else {
        tracing::warn!("No master backend configured; callers will receive null results");
    }

    for (index, url) in cli.clients.iter().enumerate() {
        let inner = RpcHttpClient::new(url.clone()).with_name(format!("client{index}"));
        tracing::info!("Waiting for the secondary backend at {}", url);
        inner.wait_until_running().await;
        orchestrator.add_client(Arc::new(SyncClient::new(inner))).await;
    }

    for (index, url) in cli.raw_clients.iter().enumerate() {
        let inner = RpcHttpClient::new(url.clone()).with_name(format!("raw{index}"));
        tracing::info!("Waiting for the raw-signing backend at {}", url);
        inner.wait_until_running().await;
        let (signer, seeds) = build_signer(&accounts, cli.chain_id).await?;
        let client = SyncClient::new(inner).with_signer(signer);
        for (declared, derived) in &seeds {
            client.seed_address(declared, derived).await;
        }
        orchestrator.add_client(Arc::new(client)).await;
    }

    if let Some(path) = &cli.export_json {
        let exporter = JsonExporter::create(path)
            .map_err(|e| anyhow::anyhow!("Cannot create export file {}: {}", path, e))?;
        orchestrator
            .add_plugin(Arc::new(JsonRpcExportPlugin::new(exporter)))
            .await;
    }
    if !cli.no_differential {
        orchestrator
            .add_plugin(Arc::new(DifferentialTester::new()))
            .await;
    }
    orchestrator.run_plugins().await;

    let addr: SocketAddr = cli
        .bind
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address {}: {}", cli.bind, e))?;
    let server = HttpServer::new(orchestrator.clone());

    tokio::select! {
        result = server.run(addr) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted; shutting down");
            orchestrator.shutdown().await;
        }
    }
    Ok(())
}
