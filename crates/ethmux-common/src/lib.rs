//! # ethmux Common Types
//!
//! Shared protocol definitions and utilities for the ethmux JSON-RPC
//! multiplexer.
//!
//! ethmux replays a single inbound JSON-RPC request against one *master*
//! Ethereum backend and any number of *secondary* backends, returning the
//! master's response while exposing the full per-backend result set to
//! observer plugins. This crate contains the pieces every component shares:
//!
//! - [`protocol`] - JSON-RPC 2.0 request/response/error types, the parsed
//!   call model, and the per-backend [`ClientResult`] outcome
//! - [`transport`] - HTTP boundary helpers (body parsing, version gating)
//! - [`error`] - The [`EthmuxError`] taxonomy
//! - [`hex`] - Quantity and hex-address utilities
//! - [`receipt`] - Transaction receipt interpretation
//!
//! # Example
//!
//! ```
//! use ethmux_common::{JsonRpcRequest, RpcCall};
//! use serde_json::json;
//!
//! let request = JsonRpcRequest::new("eth_getTransactionReceipt", json!(["0xabc"]));
//! let call = RpcCall::parse(request);
//! assert_eq!(call.method(), "eth_getTransactionReceipt");
//! assert_eq!(call.args[0], json!("0xabc"));
//! ```

pub mod error;
pub mod hex;
pub mod protocol;
pub mod receipt;
pub mod transport;

pub use error::{EthmuxError, Result};
pub use protocol::{
    ClientResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcCall, RpcFailure,
};
