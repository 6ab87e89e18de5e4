//! Lambdas and closures: captures from enclosing scopes, capability values,
//! and declaration-time validation.

use serde_json::json;

use wireflow::{
    BoardCapability, FlowError, Lambda, LambdaOptions, NodeSpec, Scope, ScopeConfig, Values,
    CLOSURE_INPUT_ID, INVOKE_TYPE, WILDCARD_PORT,
};

use crate::common::{echo, emit, values, Recorder};

/// **Scenario**: a subgraph capturing one outer value receives it at the
/// synthetic input port named `$l-<port>-<id>` when invoked through its
/// capability.
#[tokio::test]
async fn closure_forwards_captured_value() {
    let outer = Scope::new(ScopeConfig::default());
    outer.add_handler("seven", emit(json!({ "x": 7 })));
    let consumer_log = Recorder::new();
    outer.add_handler("echo", consumer_log.clone());
    let producer = outer.add_node(NodeSpec::new("seven"));

    let mut consumer_ref = None;
    let lambda = Lambda::build(&outer, |inner, _input, output| {
        let consumer = inner.add_node(NodeSpec::new("echo"));
        producer.wire_to("x", &consumer, "cx")?;
        consumer.wire_to("cx", output, "cx")?;
        consumer_ref = Some(consumer);
        Ok(Some(output.clone()))
    })
    .await
    .unwrap();
    assert!(lambda.is_closure());

    // The lambda node carries the serialized subgraph, rewired to read the
    // capture from the closure input.
    let consumer_id = consumer_ref.unwrap().id();
    let wire = format!("$l-x-{consumer_id}");
    let lambda_node = lambda.lambda_node().await.unwrap();
    assert_eq!(lambda_node.type_name(), "lambda");
    let capability = BoardCapability::from_value(&lambda_node.configuration()["board"])
        .expect("board capability");
    assert!(
        capability
            .board
            .edges
            .iter()
            .any(|edge| edge.from == CLOSURE_INPUT_ID && edge.out == wire && edge.constant),
        "closure input must feed {wire}"
    );

    // Run the closure end-to-end: producer -> lambda -> invoke -> output.
    let invoke_node = lambda.node(&outer, Values::new()).await.unwrap();
    let out = outer.add_node(NodeSpec::new("output"));
    invoke_node.wire_to(WILDCARD_PORT, &out, "").unwrap();

    let caller = Scope::new(ScopeConfig::default());
    let result = caller.invoke_one_round(values(json!({})), &out).await.unwrap();

    assert_eq!(result["cx"], 7);
    let seen = consumer_log.calls();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["cx"], 7, "captured value reaches the inner consumer");
}

/// **Scenario**: an uncaptured lambda instantiates as a plain node that runs
/// its subgraph as one round, and exposes a static capability.
#[tokio::test]
async fn plain_lambda_runs_as_node() {
    let outer = Scope::new(ScopeConfig::default());
    outer.add_handler("source", emit(json!({ "q": 5 })));
    let sink = Recorder::new();
    outer.add_handler("sink", sink.clone());

    let lambda = Lambda::build(&outer, |_inner, input, output| {
        input.wire_to(WILDCARD_PORT, output, "")?;
        Ok(Some(output.clone()))
    })
    .await
    .unwrap();
    assert!(!lambda.is_closure());

    let capability = lambda.capability().await.unwrap();
    let board = BoardCapability::from_value(&capability).unwrap();
    assert_eq!(board.board.nodes.len(), 2);

    let source = outer.add_node(NodeSpec::new("source"));
    let instance = lambda.node(&outer, Values::new()).await.unwrap();
    let consumer = outer.add_node(NodeSpec::new("sink"));
    source.wire_to("q", &instance, "q").unwrap();
    instance.wire_to("q", &consumer, "q").unwrap();
    source.pin();

    outer.invoke().await.unwrap();

    assert_eq!(sink.calls()[0]["q"], 5);
}

/// **Scenario**: closure wires must come from an ancestor scope and must
/// name their ports.
#[tokio::test]
async fn closure_wire_validation() {
    let outer = Scope::new(ScopeConfig::default());
    let stranger_scope = Scope::new(ScopeConfig::default());
    let stranger = stranger_scope.add_node(NodeSpec::new("noop"));
    let parent = outer.add_node(NodeSpec::new("noop"));

    let result = Lambda::build(&outer, |inner, _input, output| {
        let consumer = inner.add_node(NodeSpec::new("noop"));
        match stranger.wire_to("x", &consumer, "x") {
            Err(FlowError::ForeignWire) => {}
            other => panic!("expected ForeignWire, got {other:?}"),
        }
        match parent.wire_to(WILDCARD_PORT, &consumer, "") {
            Err(FlowError::UnnamedClosureWire) => {}
            other => panic!("expected UnnamedClosureWire, got {other:?}"),
        }
        consumer.wire_to("x", output, "x")?;
        Ok(Some(output.clone()))
    })
    .await;
    assert!(result.is_ok());
}

/// **Scenario**: a builder that pins nothing is an error directing to the
/// input/output primitives; disjoint pins are an error naming the nodes.
#[tokio::test]
async fn subgraph_pinning_is_validated() {
    let outer = Scope::new(ScopeConfig::default());

    let empty = Lambda::build(&outer, |_inner, _input, _output| Ok(None)).await;
    match empty {
        Err(FlowError::EmptyGraph) => {}
        other => panic!("expected EmptyGraph, got {other:?}"),
    }

    let disjoint = Lambda::build(&outer, |inner, _input, _output| {
        inner.add_node(NodeSpec::new("a").id("a-1")).pin();
        inner.add_node(NodeSpec::new("b").id("b-2")).pin();
        Ok(None)
    })
    .await;
    match disjoint {
        Err(FlowError::DisjointGraphs(2, ids)) => {
            assert_eq!(ids, vec!["a-1".to_string(), "b-2".to_string()]);
        }
        other => panic!("expected DisjointGraphs, got {other:?}"),
    }
}

/// **Scenario**: declaring a lambda with neither an invoke function nor a
/// graph is rejected at construction.
#[tokio::test]
async fn lambda_requires_a_definition() {
    let outer = Scope::new(ScopeConfig::default());
    match Lambda::from_handler(&outer, LambdaOptions::default(), None) {
        Err(FlowError::MissingDefinition) => {}
        other => panic!("expected MissingDefinition, got {:?}", other.err()),
    }

    let from_fn = Lambda::from_handler(&outer, LambdaOptions::default(), Some(echo())).unwrap();
    let instance = from_fn.node(&outer, Values::new()).await.unwrap();
    assert_ne!(instance.type_name(), INVOKE_TYPE);
}
