use thiserror::Error;

use crate::protocol::RpcFailure;

/// Error taxonomy for the multiplexer core.
///
/// Two variants deserve a note:
/// - [`EthmuxError::Rpc`] wraps a well-formed JSON-RPC error response from a
///   backend. The orchestrator catches it at the per-client boundary and
///   records it as a [`RpcFailure`] value so sibling clients still run.
/// - [`EthmuxError::ConnectionReset`] marks the transient "remote end closed
///   the connection" class of transport failure; the HTTP client retries
///   these indefinitely with a short backoff rather than surfacing them.
#[derive(Error, Debug)]
pub enum EthmuxError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection reset: {0}")]
    ConnectionReset(String),

    #[error("{0}")]
    Rpc(RpcFailure),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid response from {client}: {message}")]
    InvalidResponse { client: String, message: String },

    #[error("no private key held for address {0}")]
    UnknownSigner(String),

    #[error("transaction signing failed: {0}")]
    Signing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EthmuxError {
    /// True for the transient transport failures the HTTP client retries.
    pub fn is_transient(&self) -> bool {
        matches!(self, EthmuxError::ConnectionReset(_))
    }

    /// The captured backend failure, when this is a JSON-RPC error.
    pub fn rpc_failure(&self) -> Option<&RpcFailure> {
        match self {
            EthmuxError::Rpc(f) => Some(f),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EthmuxError>;
