//! # wireflow
//!
//! A dataflow graph execution engine: typed nodes connected by directed,
//! named-port wires, scheduled as their inputs become satisfied and run by
//! externally supplied handlers.
//!
//! ## Design Principles
//!
//! - **Dependency-driven readiness**: a node runs when its named in-ports all
//!   have buffered values; results fan out along outgoing wires, wildcard
//!   (`*`) wires forward everything, constant wires keep their value readable
//!   across runs.
//! - **Strictly sequential**: one node at a time, its result fully
//!   distributed before the next dequeue. Concurrency lives inside handlers,
//!   never between them.
//! - **Scoped handler resolution**: type names resolve through the scope's
//!   own registry, then the dynamic (caller) chain, then the lexical
//!   (declaration) chain.
//! - **Graphs as values**: a subgraph can capture wires from its enclosing
//!   scope and travel as a `{ kind: "board" }` capability that `invoke` nodes
//!   run later.
//!
//! ## Main Modules
//!
//! - [`scope`]: `Scope`, `NodeRef`, `NodeSpec` — build graphs, register
//!   handlers, run them (`invoke`, `invoke_one_round`).
//! - [`graph`]: the node/edge arena and the `Scheduler` readiness state.
//! - [`handler`]: the `NodeHandler` contract and `FnHandler` adapters.
//! - [`lambda`]: closures over enclosing scopes and board capabilities.
//! - [`serialize`] / [`descriptor`]: portable graph descriptors, both ways.
//! - [`events`]: an async stream of per-node run events.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use wireflow::{FnHandler, NodeSpec, Scope, ScopeConfig, Values};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), wireflow::FlowError> {
//! let scope = Scope::new(ScopeConfig::default());
//! scope.add_handler(
//!     "shout",
//!     Arc::new(FnHandler::new(|inputs: Values| {
//!         let text = inputs["text"].as_str().unwrap_or_default().to_uppercase();
//!         let mut outputs = Values::new();
//!         outputs.insert("text".into(), text.into());
//!         Ok(outputs)
//!     })),
//! );
//!
//! let hello = scope.add_node(
//!     NodeSpec::new("shout").config("text", "hello".into()),
//! );
//! hello.pin();
//! scope.invoke().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - `tracing`: route engine logging through the `tracing` crate instead of
//!   stderr.

pub mod callbacks;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod graph;
pub mod handler;
pub mod lambda;
pub mod scope;
pub mod serialize;
pub mod value;

pub use callbacks::{InvokeCallbacks, NodeInfo};
pub use descriptor::{EdgeDescriptor, GraphDescriptor, GraphMetadata, NodeDescriptor};
pub use error::FlowError;
pub use events::{EventStream, RunEvent};
pub use graph::{Delivery, Distribution, Scheduler, CONTROL_PORT, WILDCARD_PORT};
pub use handler::{FnHandler, NodeDescription, NodeHandler};
pub use lambda::{Lambda, LambdaOptions, CLOSURE_INPUT_ID, INVOKE_TYPE, LAMBDA_TYPE};
pub use scope::{NodeRef, NodeSpec, Scope, ScopeConfig, INPUT_TYPE, OUTPUT_TYPE};
pub use serialize::{infer_schema, serialize_scope};
pub use value::{
    error_message, error_value, BoardCapability, NodeValue, Values, BOARD_KEY, ERROR_KEY,
    STATE_KEY,
};
