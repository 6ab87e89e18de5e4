//! Engine error types.
//!
//! Construction-time failures (bad subgraph declarations, invalid wires)
//! surface immediately to whoever is building the graph; execution-time
//! failures surface from `Scope::invoke`. A handler failure is not an error
//! here — it becomes a `$error` output value and only turns into
//! [`FlowError::NodeFailed`] when no wire consumes it.

use thiserror::Error;

/// Engine error.
#[derive(Debug, Error)]
pub enum FlowError {
    /// No handler registered for a node type anywhere in the scope chain.
    #[error("handler {0} not found")]
    HandlerNotFound(String),

    /// A handler failed with a message (e.g. upstream call failed, bad input).
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// A node produced `$error` and no outgoing wire consumed it.
    #[error("node {node} failed: {message}")]
    NodeFailed { node: String, message: String },

    /// A subgraph declaration pinned nothing.
    #[error("if not returning a graph, use the `input` and `output` primitives")]
    EmptyGraph,

    /// A subgraph declaration ended up with several disjoint components.
    #[error("expected exactly one graph, but got {0}. Are {nodes} maybe disjoint?", nodes = .1.join(", "))]
    DisjointGraphs(usize, Vec<String>),

    /// A lambda was declared with neither an invoke function nor a builder.
    #[error("missing invoke or graph definition function")]
    MissingDefinition,

    /// Closure wires must name their ports.
    #[error("can't use * or empty wires from parent scopes")]
    UnnamedClosureWire,

    /// The wire source scope is not an ancestor of the destination scope.
    #[error("only wires from parent scopes allowed")]
    ForeignWire,

    /// Schemas can only be derived for `input` and `output` nodes.
    #[error("can't derive schema for node {id} of type {type_name}")]
    SchemaInference { id: String, type_name: String },

    /// A graph descriptor referenced a node id it does not define.
    #[error("unknown node {0} in graph descriptor")]
    UnknownNode(String),

    /// A `$board` value was not a board capability.
    #[error("invalid board capability: {0}")]
    InvalidCapability(String),

    /// A `$state` value could not be restored into a scheduler.
    #[error("invalid state snapshot: {0}")]
    InvalidSnapshot(String),
}
