//! The plugin contract.
//!
//! A plugin observes (and may rewrite or veto) every request the
//! orchestrator dispatches, and sees the full per-backend outcome list
//! afterwards. Lifecycle: `added` fires once on attach, `run` once after
//! all clients and plugins are attached, `before_post`/`after_post` any
//! number of times, and `shutdown` on detach. The default `shutdown`
//! delegates to `finalize` so one-shot teardown logic only needs writing
//! once.

use async_trait::async_trait;

use ethmux_common::protocol::{ClientResult, JsonRpcRequest};

use crate::orchestrator::Orchestrator;

/// What `before_post` wants done with the inbound request.
#[derive(Debug, Clone)]
pub enum PluginAction {
    /// Dispatch the request as-is.
    Unchanged,
    /// Dispatch this request instead.
    Replace(JsonRpcRequest),
    /// Do not dispatch at all. The orchestrator logs the drop and skips
    /// every backend for this request.
    Drop,
}

#[async_trait]
pub trait Plugin: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> String;

    /// Fires once when the plugin is attached to an orchestrator.
    async fn added(&self, orchestrator: &Orchestrator) {
        let _ = orchestrator;
    }

    /// Fires once after all clients and plugins are attached. Intended for
    /// plugins that drive their own traffic rather than reacting to it.
    async fn run(&self, orchestrator: &Orchestrator) {
        let _ = orchestrator;
    }

    /// Inspects a request before dispatch.
    async fn before_post(
        &self,
        orchestrator: &Orchestrator,
        request: &JsonRpcRequest,
    ) -> PluginAction {
        let _ = (orchestrator, request);
        PluginAction::Unchanged
    }

    /// Receives the ordered outcome list `[master, secondary1, ...]` after a
    /// dispatched request completes. A failed backend appears as its typed
    /// failure in its slot, keeping the list index-aligned with the client
    /// list.
    async fn after_post(
        &self,
        orchestrator: &Orchestrator,
        request: &JsonRpcRequest,
        results: &[ClientResult],
    ) {
        let _ = (orchestrator, request, results);
    }

    /// One-shot teardown work (flush files, drain pending state). Must be
    /// idempotent; it may be invoked through `shutdown` as well as directly.
    async fn finalize(&self, orchestrator: &Orchestrator) {
        let _ = orchestrator;
    }

    /// Fires when the plugin is detached or the orchestrator shuts down.
    async fn shutdown(&self, orchestrator: &Orchestrator) {
        self.finalize(orchestrator).await;
    }
}
