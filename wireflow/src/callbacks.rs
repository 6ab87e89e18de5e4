//! Invocation hooks: before/after/stop/done observers for the execution loop.
//!
//! Hooks registered on a scope are consulted by `Scope::invoke`. `before` can
//! short-circuit a handler (mocking, synchronous input injection), `stop`
//! cooperatively halts a run, `after` observes every distribution, and `done`
//! always fires when a run ends.

use std::sync::Arc;

use async_trait::async_trait;

use crate::graph::Distribution;
use crate::scope::Scope;
use crate::value::Values;

/// Static description of a node, handed to hooks.
#[derive(Clone, Debug)]
pub struct NodeInfo {
    pub id: String,
    pub type_name: String,
    pub configuration: Values,
}

/// Hooks around the execution loop. All methods default to no-ops.
#[async_trait]
pub trait InvokeCallbacks: Send + Sync {
    /// Runs before a node's handler. The first hook (most recently added
    /// first) returning `Some` short-circuits the handler and its value
    /// becomes the node's result.
    async fn before(&self, node: &NodeInfo, inputs: &Values) -> Option<Values> {
        let _ = (node, inputs);
        None
    }

    /// Runs after a node's result was distributed.
    async fn after(
        &self,
        scope: &Arc<Scope>,
        node: &NodeInfo,
        inputs: &Values,
        outputs: &Values,
        distribution: &Distribution,
    ) {
        let _ = (scope, node, inputs, outputs, distribution);
    }

    /// Polled between nodes; returning true halts the loop after the current
    /// node's distribution step.
    async fn stop(&self) -> bool {
        false
    }

    /// Runs when the loop ends, success or failure.
    async fn done(&self) {}
}
