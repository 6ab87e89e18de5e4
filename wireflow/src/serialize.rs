//! Serialize a live graph into a portable descriptor.
//!
//! Walks the connected component(s) of the requested roots and emits plain
//! nodes and edges. Nodes backed by a subgraph handler become `invoke` nodes
//! with their subgraph attached under the owning node's id. `input`/`output`
//! nodes without an explicit schema get one inferred from their neighbors.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::descriptor::{EdgeDescriptor, GraphDescriptor, GraphMetadata, NodeDescriptor};
use crate::error::FlowError;
use crate::graph::{NodeId, CONTROL_PORT, WILDCARD_PORT};
use crate::lambda::INVOKE_TYPE;
use crate::scope::{NodeRef, Scope, INPUT_TYPE, OUTPUT_TYPE};
use crate::value::{NodeValue, Values};

impl Scope {
    /// Serializes the connected component(s) of `node`, or of all pinned
    /// nodes, into a portable descriptor.
    pub async fn serialize(
        self: &Arc<Self>,
        metadata: Option<GraphMetadata>,
        node: Option<&NodeRef>,
    ) -> Result<GraphDescriptor, FlowError> {
        serialize_scope(self, metadata, node).await
    }
}

/// Free-standing form of [`Scope::serialize`].
pub async fn serialize_scope(
    scope: &Arc<Scope>,
    metadata: Option<GraphMetadata>,
    node: Option<&NodeRef>,
) -> Result<GraphDescriptor, FlowError> {
    let roots: Vec<NodeId> = match node {
        Some(node) => vec![node.node_id()],
        None => scope.pinned_ids(),
    };
    let members: Vec<NodeId> = {
        let graph = scope.graph_state();
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut members = Vec::new();
        for root in roots {
            for member in graph.connected_component(root) {
                if seen.insert(member) {
                    members.push(member);
                }
            }
        }
        members
    };

    let mut descriptor = GraphDescriptor::default();
    if let Some(metadata) = metadata {
        descriptor.url = metadata.url;
        descriptor.title = metadata.title;
        descriptor.description = metadata.description;
        descriptor.version = metadata.version;
    }

    for &member in &members {
        let (node_descriptor, subgraph) = serialize_node(scope, member).await?;
        if let Some(subgraph) = subgraph {
            descriptor.graphs.insert(node_descriptor.id.clone(), subgraph);
        }
        descriptor.nodes.push(node_descriptor);
    }
    {
        let graph = scope.graph_state();
        for &member in &members {
            for edge in graph.outgoing(member) {
                descriptor.edges.push(EdgeDescriptor {
                    from: graph.node(edge.from).id.clone(),
                    to: graph.node(edge.to).id.clone(),
                    out: edge.out.clone(),
                    in_: edge.in_.clone(),
                    constant: edge.constant,
                });
            }
        }
    }
    Ok(descriptor)
}

/// Serializes one node into `(descriptor, subgraph?)`.
///
/// Returns an explicitly boxed future: this function and `serialize_scope`
/// recurse through each other, and the type-erased `BoxFuture` return breaks
/// the otherwise-cyclic `Send` auto-trait inference between them.
fn serialize_node<'a>(
    scope: &'a Arc<Scope>,
    node: NodeId,
) -> BoxFuture<'a, Result<(NodeDescriptor, Option<GraphDescriptor>), FlowError>> {
    Box::pin(async move {
    let (id, type_name, mut configuration, schema) = {
        let graph = scope.graph_state();
        let data = graph.node(node);
        (
            data.id.clone(),
            data.type_name.clone(),
            data.configuration.clone(),
            data.schema.clone(),
        )
    };

    // A node backed by a subgraph handler serializes as an invoke node with
    // the subgraph attached under its id.
    if let Some(handler) = scope.get_handler(&type_name) {
        if let Some(subgraph_scope) = handler.graph() {
            let root = subgraph_scope.single_pinned()?;
            let nested: BoxFuture<'_, Result<GraphDescriptor, FlowError>> =
                Box::pin(serialize_scope(&subgraph_scope, None, Some(&root)));
            let subgraph = nested.await?;
            configuration.insert("path".to_string(), NodeValue::String(format!("#{id}")));
            return Ok((
                NodeDescriptor {
                    id,
                    type_name: INVOKE_TYPE.to_string(),
                    configuration,
                },
                Some(subgraph),
            ));
        }
    }

    if let Some(schema) = schema {
        configuration.insert("schema".to_string(), schema);
    } else if (type_name == INPUT_TYPE || type_name == OUTPUT_TYPE)
        && !configuration.contains_key("schema")
    {
        let node_ref = NodeRef {
            scope: scope.clone(),
            id: node,
        };
        let schema = infer_schema(&node_ref).await?;
        configuration.insert("schema".to_string(), schema);
    }

    Ok((
        NodeDescriptor {
            id,
            type_name,
            configuration,
        },
        None,
    ))
    })
}

struct PortProbe {
    name: String,
    neighbor_type: String,
    neighbor_port: String,
    fragment: Option<NodeValue>,
}

/// Best-effort port schema for an `input` or `output` node.
///
/// Each named port is resolved from, in order: the wire's own schema hint,
/// the neighboring handler's `describe` (the matching in-port fragment of a
/// downstream node for `input` nodes, the matching out-port fragment of an
/// upstream node for `output` nodes), or a `{type: "string"}` default. Ports
/// whose fragment carries the internal `$skip` marker are left out of
/// `required`; the marker is stripped from the emitted schema.
pub async fn infer_schema(node: &NodeRef) -> Result<NodeValue, FlowError> {
    let scope = node.scope();
    let node = node.node_id();
    let (is_input, probes) = {
        let graph = scope.graph_state();
        let data = graph.node(node);
        let is_input = match data.type_name.as_str() {
            INPUT_TYPE => true,
            OUTPUT_TYPE => false,
            _ => {
                return Err(FlowError::SchemaInference {
                    id: data.id.clone(),
                    type_name: data.type_name.clone(),
                })
            }
        };
        let mut probes = Vec::new();
        if is_input {
            for edge in graph.outgoing(node) {
                if edge.out == WILDCARD_PORT || edge.out == CONTROL_PORT {
                    continue;
                }
                probes.push(PortProbe {
                    name: edge.out.clone(),
                    neighbor_type: graph.node(edge.to).type_name.clone(),
                    neighbor_port: edge.in_.clone(),
                    fragment: edge.schema.clone(),
                });
            }
        } else {
            for edge in graph.incoming(node) {
                if edge.out == WILDCARD_PORT || edge.out == CONTROL_PORT {
                    continue;
                }
                probes.push(PortProbe {
                    name: edge.in_.clone(),
                    neighbor_type: graph.node(edge.from).type_name.clone(),
                    neighbor_port: edge.out.clone(),
                    fragment: edge.schema.clone(),
                });
            }
        }
        (is_input, probes)
    };

    let mut properties = Values::new();
    let mut required: Vec<NodeValue> = Vec::new();
    for probe in probes {
        if properties.contains_key(&probe.name) {
            continue;
        }
        let mut fragment = match probe.fragment {
            Some(fragment) => fragment,
            None => {
                match neighbor_fragment(scope, is_input, &probe.neighbor_type, &probe.neighbor_port)
                    .await
                {
                    Some(fragment) => fragment,
                    None => serde_json::json!({ "type": "string", "title": probe.name.clone() }),
                }
            }
        };
        let skip = fragment.as_object_mut().is_some_and(|object| {
            object.remove("$skip").and_then(|value| value.as_bool()) == Some(true)
        });
        if !skip {
            required.push(NodeValue::String(probe.name.clone()));
        }
        properties.insert(probe.name, fragment);
    }
    Ok(serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    }))
}

async fn neighbor_fragment(
    scope: &Arc<Scope>,
    is_input: bool,
    neighbor_type: &str,
    neighbor_port: &str,
) -> Option<NodeValue> {
    let handler = scope.get_handler(neighbor_type)?;
    let description = handler.describe().await?;
    let schema = if is_input {
        description.input_schema
    } else {
        description.output_schema
    };
    schema.get("properties")?.get(neighbor_port).cloned()
}
