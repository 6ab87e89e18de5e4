//! Graph model and scheduling state.
//!
//! `node` holds the passive arena of nodes and edges; `scheduler` tracks
//! readiness, buffered inputs, and fan-out distribution for one run. The
//! execution loop itself lives in [`crate::scope`].

pub mod logging;
mod node;
mod scheduler;

pub use node::{Edge, EdgeId, Graph, Node, NodeId, CONTROL_PORT, WILDCARD_PORT};
pub use scheduler::{Delivery, Distribution, Scheduler};
