//! # ethmux Client Abstraction
//!
//! A uniform interface over "a thing that can execute one JSON-RPC call and
//! report whether it is reachable", plus the concrete HTTP transport.
//!
//! The [`BackendClient`] trait is what the orchestrator multiplexes over:
//! the master backend, every secondary backend, and any synchronization
//! decorator wrapped around one all implement it. [`RpcHttpClient`] is the
//! standard implementation speaking JSON-RPC 2.0 over HTTP POST with
//! reconnect-retry, wire-id reassignment, and blocking receipt polling.

pub mod client;
pub mod http;

pub use client::{AccountCreation, BackendClient, CallContext, LocalCall};
pub use http::RpcHttpClient;
