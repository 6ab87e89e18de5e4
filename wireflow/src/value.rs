//! Dynamic values flowing along wires.
//!
//! Every port carries a `NodeValue` (arbitrary JSON); a node consumes and
//! produces a `Values` bundle keyed by port name. A handful of `$`-prefixed
//! keys are reserved by the engine.

use serde::{Deserialize, Serialize};

use crate::descriptor::GraphDescriptor;

/// A single value travelling along a wire.
pub type NodeValue = serde_json::Value;

/// A bundle of values keyed by port name.
pub type Values = serde_json::Map<String, NodeValue>;

/// Error sentinel output key. A failing handler's error is wrapped under this
/// key; if no outgoing wire consumes it, the run aborts.
pub const ERROR_KEY: &str = "$error";

/// Suspended scheduler snapshot key, returned by a nested round that was
/// halted early and accepted back to resume it.
pub const STATE_KEY: &str = "$state";

/// Capability input key of an `invoke` node.
pub const BOARD_KEY: &str = "$board";

/// A serialized graph passed around as a value — the only value type that
/// crosses the boundary between data and callable subgraph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardCapability {
    /// Always `"board"`.
    pub kind: String,
    pub board: GraphDescriptor,
}

impl BoardCapability {
    pub fn new(board: GraphDescriptor) -> Self {
        Self {
            kind: "board".to_string(),
            board,
        }
    }

    /// Parses a capability out of a value; `None` if the value is not a
    /// `{ kind: "board", board: ... }` object.
    pub fn from_value(value: &NodeValue) -> Option<Self> {
        let capability: BoardCapability = serde_json::from_value(value.clone()).ok()?;
        (capability.kind == "board").then_some(capability)
    }

    pub fn into_value(self) -> NodeValue {
        serde_json::to_value(self).expect("capability serializes to JSON")
    }
}

/// Wraps an error message into the value shape delivered under [`ERROR_KEY`].
pub fn error_value(message: &str) -> NodeValue {
    serde_json::json!({ "type": "error", "error": message })
}

/// Extracts the message out of an [`error_value`]-shaped value.
pub fn error_message(value: &NodeValue) -> Option<&str> {
    value.get("error").and_then(NodeValue::as_str)
}
