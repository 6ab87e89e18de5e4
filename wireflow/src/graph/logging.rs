//! Logging utilities for graph execution.
//!
//! Provides structured logging for invocation runs, node execution, and
//! distribution results. With the `tracing` feature the events go through the
//! `tracing` crate; without it they fall back to stderr.

use crate::error::FlowError;

use super::scheduler::Distribution;

/// Log node execution start.
pub fn log_node_start(node_id: &str, type_name: &str) {
    #[cfg(feature = "tracing")]
    tracing::debug!(node_id, type_name, "Starting node execution");

    #[cfg(not(feature = "tracing"))]
    eprintln!("[DEBUG] Starting node execution: {} ({})", node_id, type_name);
}

/// Log node execution completion with its distribution result.
pub fn log_node_complete(node_id: &str, distribution: &Distribution) {
    #[cfg(feature = "tracing")]
    tracing::debug!(
        node_id,
        receivers = distribution.nodes.len(),
        unused = ?distribution.unused,
        "Node execution complete"
    );

    #[cfg(not(feature = "tracing"))]
    eprintln!(
        "[DEBUG] Node execution complete: {} -> {} receiver(s), unused {:?}",
        node_id,
        distribution.nodes.len(),
        distribution.unused
    );
}

/// Log invocation start.
pub fn log_invoke_start() {
    #[cfg(feature = "tracing")]
    tracing::info!("Starting graph invocation");

    #[cfg(not(feature = "tracing"))]
    eprintln!("[INFO] Starting graph invocation");
}

/// Log invocation completion.
pub fn log_invoke_complete() {
    #[cfg(feature = "tracing")]
    tracing::info!("Graph invocation complete");

    #[cfg(not(feature = "tracing"))]
    eprintln!("[INFO] Graph invocation complete");
}

/// Log invocation error.
pub fn log_invoke_error(error: &FlowError) {
    #[cfg(feature = "tracing")]
    tracing::error!(?error, "Graph invocation error");

    #[cfg(not(feature = "tracing"))]
    eprintln!("[ERROR] Graph invocation error: {:?}", error);
}
