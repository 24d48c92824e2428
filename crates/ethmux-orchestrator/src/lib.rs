//! # ethmux Orchestrator
//!
//! The multiplexing core: one inbound JSON-RPC request is dispatched to the
//! master backend (whose answer is the canonical one) and replayed against
//! every secondary backend, with plugins observing the full outcome list.
//!
//! - [`Orchestrator`] owns the client and plugin lists and runs dispatch
//! - [`Plugin`] is the observer contract; [`DifferentialTester`] and
//!   [`JsonRpcExportPlugin`] are the two shipped implementations
//! - [`HttpServer`] is the axum front-end exposing POST `/`

pub mod differential;
pub mod export;
pub mod http_server;
pub mod orchestrator;
pub mod plugin;

pub use differential::{DifferentialTest, DifferentialTester, Outcome};
pub use export::{JsonExporter, JsonRpcExportPlugin};
pub use http_server::HttpServer;
pub use orchestrator::Orchestrator;
pub use plugin::{Plugin, PluginAction};
