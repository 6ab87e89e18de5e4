//! Portable graph descriptors.
//!
//! A descriptor is the serialized, storage-friendly form of a graph: plain
//! nodes and edges keyed by string ids, with nested subgraphs attached under
//! the owning node's id. Produced by [`crate::serialize`] and consumed by
//! [`crate::scope::Scope::from_descriptor`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Values;

/// Serialized graph: edges, nodes, and optional nested subgraphs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub edges: Vec<EdgeDescriptor>,
    pub nodes: Vec<NodeDescriptor>,
    /// Subgraphs keyed by the id of the node that invokes them.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub graphs: BTreeMap<String, GraphDescriptor>,
    /// Values bound to the graph itself; merged over supplied inputs when the
    /// graph is invoked (this is how captured closure values travel).
    #[serde(default, skip_serializing_if = "Values::is_empty")]
    pub args: Values,
}

/// Serialized node: identity, type, and static configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Values::is_empty")]
    pub configuration: Values,
}

/// Serialized edge between two node ids.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeDescriptor {
    pub from: String,
    pub to: String,
    pub out: String,
    #[serde(rename = "in")]
    pub in_: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub constant: bool,
}

/// Graph metadata applied onto a descriptor at serialization time.
#[derive(Clone, Debug, Default)]
pub struct GraphMetadata {
    pub url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}
