//! Serialization round-trips, schema inference, and descriptor loading.

use std::sync::Arc;

use serde_json::json;

use wireflow::{
    infer_schema, FlowError, FnHandler, GraphMetadata, Lambda, NodeDescription, NodeSpec, Scope,
    ScopeConfig, Values, WILDCARD_PORT,
};

use crate::common::{echo, emit, values};

/// **Scenario**: `input -> output` serializes to exactly one input node, one
/// output node, and one `out="*"`, `in=""` edge.
#[tokio::test]
async fn minimal_graph_round_trips() {
    let scope = Scope::new(ScopeConfig::default());
    let input = scope.add_node(NodeSpec::new("input"));
    let output = scope.add_node(NodeSpec::new("output"));
    input.wire_to(WILDCARD_PORT, &output, "").unwrap();
    input.pin();

    let descriptor = scope.serialize(None, None).await.unwrap();

    assert_eq!(descriptor.nodes.len(), 2);
    assert_eq!(
        descriptor
            .nodes
            .iter()
            .filter(|node| node.type_name == "input")
            .count(),
        1
    );
    assert_eq!(
        descriptor
            .nodes
            .iter()
            .filter(|node| node.type_name == "output")
            .count(),
        1
    );
    assert_eq!(descriptor.edges.len(), 1);
    assert_eq!(descriptor.edges[0].out, "*");
    assert_eq!(descriptor.edges[0].in_, "");
}

/// **Scenario**: input/output schemas are inferred from neighboring
/// handlers' describe, defaulting to string ports; wire hints win, and
/// `$skip`-marked fragments are stripped and left out of `required`.
#[tokio::test]
async fn schemas_are_inferred_from_neighbors() {
    let scope = Scope::new(ScopeConfig::default());
    let worker = FnHandler::new(|inputs| Ok(inputs)).with_description(NodeDescription {
        input_schema: json!({
            "type": "object",
            "properties": { "text": { "type": "string", "title": "Text" } },
        }),
        output_schema: json!({
            "type": "object",
            "properties": { "result": { "type": "number" } },
        }),
    });
    scope.add_handler("worker", Arc::new(worker));

    let input = scope.add_node(NodeSpec::new("input"));
    let work = scope.add_node(NodeSpec::new("worker"));
    let output = scope.add_node(NodeSpec::new("output"));
    input.wire_to("x", &work, "text").unwrap();
    input
        .wire_to_described("opt", &work, "note", json!({ "type": "string", "$skip": true }))
        .unwrap();
    input.wire_to("plain", &work, "other").unwrap();
    work.wire_to("result", &output, "y").unwrap();
    input.pin();

    let descriptor = scope.serialize(None, None).await.unwrap();

    let input_schema = &descriptor
        .nodes
        .iter()
        .find(|node| node.type_name == "input")
        .unwrap()
        .configuration["schema"];
    assert_eq!(input_schema["properties"]["x"]["title"], "Text");
    assert_eq!(input_schema["properties"]["opt"], json!({ "type": "string" }));
    assert_eq!(
        input_schema["properties"]["plain"],
        json!({ "type": "string", "title": "plain" })
    );
    let required = input_schema["required"].as_array().unwrap();
    assert!(required.contains(&json!("x")));
    assert!(required.contains(&json!("plain")));
    assert!(!required.contains(&json!("opt")), "$skip port is optional");

    let output_schema = &descriptor
        .nodes
        .iter()
        .find(|node| node.type_name == "output")
        .unwrap()
        .configuration["schema"];
    assert_eq!(output_schema["properties"]["y"]["type"], "number");
}

/// **Scenario**: deriving a schema for a non-input/output node is an error.
#[tokio::test]
async fn schema_inference_rejects_plain_nodes() {
    let scope = Scope::new(ScopeConfig::default());
    let node = scope.add_node(NodeSpec::new("worker").id("worker-9"));
    match infer_schema(&node).await {
        Err(FlowError::SchemaInference { id, type_name }) => {
            assert_eq!(id, "worker-9");
            assert_eq!(type_name, "worker");
        }
        other => panic!("expected SchemaInference, got {other:?}"),
    }
}

/// **Scenario**: metadata lands on the descriptor.
#[tokio::test]
async fn metadata_is_applied() {
    let scope = Scope::new(ScopeConfig::default());
    scope.add_node(NodeSpec::new("input")).pin();
    let descriptor = scope
        .serialize(
            Some(GraphMetadata {
                title: Some("demo".into()),
                version: Some("0.1.0".into()),
                ..GraphMetadata::default()
            }),
            None,
        )
        .await
        .unwrap();
    assert_eq!(descriptor.title.as_deref(), Some("demo"));
    assert_eq!(descriptor.version.as_deref(), Some("0.1.0"));
}

/// **Scenario**: a serialized graph loads back and executes identically.
#[tokio::test]
async fn loaded_descriptor_executes_like_the_original() {
    let scope = Scope::new(ScopeConfig::default());
    scope.add_handler("worker", echo());
    let input = scope.add_node(NodeSpec::new("input"));
    let work = scope.add_node(NodeSpec::new("worker"));
    let output = scope.add_node(NodeSpec::new("output"));
    input.wire_to("x", &work, "v").unwrap();
    work.wire_to("v", &output, "v").unwrap();
    input.pin();

    let descriptor = scope.serialize(None, None).await.unwrap();
    let loaded = Scope::from_descriptor(&descriptor, ScopeConfig::default()).unwrap();
    let root = loaded.single_pinned().unwrap();

    let caller = Scope::new(ScopeConfig::default());
    caller.add_handler("worker", echo());
    let result = caller
        .invoke_one_round(values(json!({ "x": 3 })), &root)
        .await
        .unwrap();

    assert_eq!(result, values(json!({ "v": 3 })));
}

/// **Scenario**: a node backed by a subgraph serializes as an `invoke` node
/// with its subgraph attached under the node's id, and the whole thing still
/// runs after a load.
#[tokio::test]
async fn subgraph_nodes_serialize_as_invoke() {
    let outer = Scope::new(ScopeConfig::default());
    outer.add_handler("source", emit(json!({ "q": 5 })));
    let lambda = Lambda::build(&outer, |_inner, input, output| {
        input.wire_to(WILDCARD_PORT, output, "")?;
        Ok(Some(output.clone()))
    })
    .await
    .unwrap();

    let source = outer.add_node(NodeSpec::new("source"));
    let instance = lambda.node(&outer, Values::new()).await.unwrap();
    let out = outer.add_node(NodeSpec::new("output"));
    source.wire_to("q", &instance, "q").unwrap();
    instance.wire_to(WILDCARD_PORT, &out, "").unwrap();

    let descriptor = outer.serialize(None, Some(&out)).await.unwrap();
    let invoke_node = descriptor
        .nodes
        .iter()
        .find(|node| node.type_name == "invoke")
        .expect("subgraph node became invoke");
    let path = invoke_node.configuration["path"].as_str().unwrap();
    assert_eq!(path, format!("#{}", invoke_node.id));
    let subgraph = descriptor
        .graphs
        .get(&invoke_node.id)
        .expect("subgraph attached under the node id");
    assert_eq!(subgraph.nodes.len(), 2);

    let loaded = Scope::from_descriptor(&descriptor, ScopeConfig::default()).unwrap();
    let root = loaded.single_pinned().unwrap();
    let caller = Scope::new(ScopeConfig::default());
    caller.add_handler("source", emit(json!({ "q": 5 })));
    let result = caller.invoke_one_round(values(json!({})), &root).await.unwrap();
    assert_eq!(result["q"], 5);
}

/// **Scenario**: descriptors referencing unknown node ids are rejected.
#[tokio::test]
async fn bad_descriptor_is_rejected() {
    let mut descriptor = wireflow::GraphDescriptor::default();
    descriptor.edges.push(wireflow::EdgeDescriptor {
        from: "ghost".into(),
        to: "ghost".into(),
        out: "x".into(),
        in_: "x".into(),
        constant: false,
    });
    match Scope::from_descriptor(&descriptor, ScopeConfig::default()) {
        Err(FlowError::UnknownNode(id)) => assert_eq!(id, "ghost"),
        other => panic!("expected UnknownNode, got {other:?}"),
    }
}
