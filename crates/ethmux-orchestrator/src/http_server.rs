//! The axum HTTP front-end.
//!
//! One JSON-RPC 2.0 endpoint at POST `/` plus a health probe at
//! GET `/__health`. Body validation happens here, before anything reaches
//! the orchestrator: malformed requests get a 400 and a declared protocol
//! version below 2.0 gets a 426 Upgrade Required.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use ethmux_common::protocol::JsonRpcResponse;
use ethmux_common::transport::{parse_body, rewrap, BoundaryError};
use ethmux_common::{EthmuxError, Result};

use crate::orchestrator::Orchestrator;

pub struct HttpServer {
    orchestrator: Arc<Orchestrator>,
}

impl HttpServer {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Binds and serves until the process is stopped.
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let app = router(self.orchestrator);

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| EthmuxError::Transport(format!("failed to bind to {addr}: {e}")))?;
        let local = listener
            .local_addr()
            .map_err(|e| EthmuxError::Transport(format!("failed to get local addr: {e}")))?;
        info!("ethmux listening on {local}");

        axum::serve(listener, app)
            .await
            .map_err(|e| EthmuxError::Transport(format!("server error: {e}")))?;
        Ok(())
    }
}

/// The axum router, exposed separately so tests can serve it on an
/// ephemeral port.
pub fn router(orchestrator: Arc<Orchestrator>) -> axum::Router {
    axum::Router::new()
        .route("/", axum::routing::post(handle_jsonrpc))
        .route("/__health", axum::routing::get(health_check))
        .layer(CorsLayer::permissive())
        .with_state(orchestrator)
}

async fn handle_jsonrpc(
    State(orchestrator): State<Arc<Orchestrator>>,
    body: Bytes,
) -> Response {
    let inbound = match parse_body(&body) {
        Ok(inbound) => inbound,
        Err(BoundaryError::Malformed(message)) => {
            debug!(%message, "rejecting malformed request");
            return (StatusCode::BAD_REQUEST, message).into_response();
        }
        Err(err @ BoundaryError::UpgradeRequired(_)) => {
            debug!(error = %err, "rejecting pre-2.0 request");
            return (StatusCode::UPGRADE_REQUIRED, err.to_string()).into_response();
        }
    };

    let caller_id = inbound.request.id.clone();
    let result = orchestrator.post(&inbound.request).await;

    // An absent outcome (no master, or a plugin dropped the request) still
    // gets a well-formed null response.
    let response = result
        .into_wire(caller_id.clone())
        .unwrap_or_else(|| JsonRpcResponse::success(caller_id, Value::Null));
    let payload = match serde_json::to_value(&response) {
        Ok(value) => value,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("response serialization failed: {e}"),
            )
                .into_response();
        }
    };
    Json(rewrap(payload, inbound.was_list)).into_response()
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
