//! Closure/lambda binder: subgraphs as capturable, callable values.
//!
//! A graph declared inside another runs in its own scope whose lexical parent
//! is the enclosing scope. Wires read from ancestor scopes are recorded as
//! closure edges and rerouted through a synthetic `closure-input` node when
//! the subgraph is finalized. A lambda node materialized on the outer scope
//! exposes the subgraph as a board capability; a captured lambda instantiates
//! as an `invoke` node fed from that capability, so closures are uniformly
//! "invoke a board value, parameterized by captured wires".

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::descriptor::{EdgeDescriptor, GraphDescriptor, GraphMetadata, NodeDescriptor};
use crate::error::FlowError;
use crate::graph::{NodeId, WILDCARD_PORT};
use crate::handler::{NodeDescription, NodeHandler};
use crate::scope::{NodeRef, NodeSpec, Scope, ScopeConfig, INPUT_TYPE, OUTPUT_TYPE};
use crate::serialize::serialize_scope;
use crate::value::{BoardCapability, NodeValue, Values, BOARD_KEY};

/// Type name of the materialized lambda node; its single `board` output is
/// the capability value.
pub const LAMBDA_TYPE: &str = "lambda";

/// Type name of nodes that invoke a board capability supplied at `$board`.
pub const INVOKE_TYPE: &str = "invoke";

/// Id of the synthetic input node receiving captured closure values.
pub const CLOSURE_INPUT_ID: &str = "closure-input";

const POISONED: &str = "lambda state poisoned";

/// A recorded dependency of an inner graph on a value produced in an
/// enclosing scope.
#[derive(Clone)]
pub(crate) struct ClosureEdge {
    pub from_scope: Arc<Scope>,
    pub from: NodeId,
    pub to: NodeId,
    pub out: String,
    pub in_: String,
}

/// Declaration options for a lambda.
#[derive(Default)]
pub struct LambdaOptions {
    /// Registered type name; defaults to a vended `fn-<n>`.
    pub name: Option<String>,
    pub input_schema: Option<NodeValue>,
    pub output_schema: Option<NodeValue>,
}

enum LambdaKind {
    Graph {
        inner: Arc<Scope>,
        handler: Arc<GraphHandler>,
    },
    Function {
        handler: Arc<dyn NodeHandler>,
    },
}

/// A declared subgraph (or bare handler) usable as a node factory and as a
/// board capability value.
pub struct Lambda {
    lexical: Arc<Scope>,
    kind: LambdaKind,
    type_name: String,
    captured: bool,
    lambda_node: Mutex<Option<NodeRef>>,
}

impl std::fmt::Debug for Lambda {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lambda")
            .field("type_name", &self.type_name)
            .field("captured", &self.captured)
            .finish_non_exhaustive()
    }
}

impl Lambda {
    /// Declares a subgraph with default options. See [`Lambda::build_with`].
    pub async fn build<F>(lexical: &Arc<Scope>, build: F) -> Result<Self, FlowError>
    where
        F: FnOnce(&Arc<Scope>, &NodeRef, &NodeRef) -> Result<Option<NodeRef>, FlowError>,
    {
        Self::build_with(lexical, LambdaOptions::default(), build).await
    }

    /// Declares a subgraph by running `build` against a fresh inner scope.
    ///
    /// The builder receives the inner scope plus pre-created `input` and
    /// `output` nodes. It may return the node whose outputs become the
    /// graph's result (wired to `output` unless it is an output node itself),
    /// or `None` if it pinned its roots explicitly. After finalization the
    /// subgraph must consist of exactly one connected component.
    pub async fn build_with<F>(
        lexical: &Arc<Scope>,
        options: LambdaOptions,
        build: F,
    ) -> Result<Self, FlowError>
    where
        F: FnOnce(&Arc<Scope>, &NodeRef, &NodeRef) -> Result<Option<NodeRef>, FlowError>,
    {
        let inner = Scope::new(ScopeConfig {
            lexical_parent: Some(lexical.clone()),
            dynamic_parent: None,
        });
        let input = {
            let mut spec = NodeSpec::new(INPUT_TYPE);
            if let Some(schema) = &options.input_schema {
                spec = spec.schema(schema.clone());
            }
            inner.add_node(spec)
        };
        let output = {
            let mut spec = NodeSpec::new(OUTPUT_TYPE);
            if let Some(schema) = &options.output_schema {
                spec = spec.schema(schema.clone());
            }
            inner.add_node(spec)
        };

        match build(&inner, &input, &output)? {
            None => {} // the builder pinned its own roots
            Some(node) => {
                if node.type_name() == OUTPUT_TYPE {
                    node.pin();
                } else {
                    node.wire_to(WILDCARD_PORT, &output, "")?;
                    output.pin();
                }
            }
        }

        // Reroute closure captures through a synthetic input node.
        let closure_edges = inner.take_closure_edges();
        let mut to_wire: Vec<ClosureEdge> = Vec::new();
        if !closure_edges.is_empty() {
            let closure_input = inner.add_node(NodeSpec::new(INPUT_TYPE).id(CLOSURE_INPUT_ID));
            closure_input.pin();
            for edge in closure_edges {
                let to_id = inner.graph_state().node(edge.to).id.clone();
                let wire = format!("$l-{}-{}", edge.out, to_id);
                inner.graph_state().add_edge(
                    closure_input.node_id(),
                    &wire,
                    edge.to,
                    &edge.in_,
                    true,
                    None,
                );
                to_wire.push(ClosureEdge {
                    to: closure_input.node_id(),
                    in_: wire,
                    ..edge
                });
            }
        }

        inner.compact_pins();
        inner.single_pinned()?;

        let description = match (&options.input_schema, &options.output_schema) {
            (Some(input_schema), Some(output_schema)) => Some(NodeDescription {
                input_schema: input_schema.clone(),
                output_schema: output_schema.clone(),
            }),
            _ => None,
        };
        let handler = Arc::new(GraphHandler {
            scope: inner.clone(),
            description,
        });
        let type_name = options.name.unwrap_or_else(|| lexical.vend("fn"));

        let lambda = Self {
            lexical: lexical.clone(),
            kind: LambdaKind::Graph { inner, handler },
            type_name,
            captured: !to_wire.is_empty(),
            lambda_node: Mutex::new(None),
        };

        // Wire the captures to the outer world. Captures from the immediate
        // lexical scope become incoming constant edges on the lambda node;
        // deeper ones are re-exported as closure edges of the lexical scope.
        if !to_wire.is_empty() {
            let lambda_node = lambda.lambda_node().await?;
            for edge in to_wire {
                if Arc::ptr_eq(&edge.from_scope, &lambda.lexical) {
                    lambda.lexical.graph_state().add_edge(
                        edge.from,
                        &edge.out,
                        lambda_node.node_id(),
                        &edge.in_,
                        true,
                        None,
                    );
                } else {
                    lambda.lexical.push_closure_edge(ClosureEdge {
                        to: lambda_node.node_id(),
                        ..edge
                    });
                }
            }
        }
        Ok(lambda)
    }

    /// Declares a lambda from a bare handler instead of a graph builder.
    /// Passing `None` is the "neither invoke nor graph given" error.
    pub fn from_handler(
        lexical: &Arc<Scope>,
        options: LambdaOptions,
        handler: Option<Arc<dyn NodeHandler>>,
    ) -> Result<Self, FlowError> {
        let handler = handler.ok_or(FlowError::MissingDefinition)?;
        let type_name = options.name.unwrap_or_else(|| lexical.vend("fn"));
        Ok(Self {
            lexical: lexical.clone(),
            kind: LambdaKind::Function { handler },
            type_name,
            captured: false,
            lambda_node: Mutex::new(None),
        })
    }

    /// True when the subgraph captured values from enclosing scopes.
    pub fn is_closure(&self) -> bool {
        self.captured
    }

    /// The subgraph's own scope, when there is one.
    pub fn graph(&self) -> Option<&Arc<Scope>> {
        match &self.kind {
            LambdaKind::Graph { inner, .. } => Some(inner),
            LambdaKind::Function { .. } => None,
        }
    }

    /// The lambda node on the outer scope, materialized on first use. Its
    /// single `board` output carries the capability.
    pub async fn lambda_node(&self) -> Result<NodeRef, FlowError> {
        if let Some(node) = self.lambda_node.lock().expect(POISONED).clone() {
            return Ok(node);
        }
        let board = self.board_descriptor().await?;
        let node = self.lexical.add_node(
            NodeSpec::new(LAMBDA_TYPE).config("board", BoardCapability::new(board).into_value()),
        );
        self.lexical.add_handler(LAMBDA_TYPE, Arc::new(LambdaHandler));
        *self.lambda_node.lock().expect(POISONED) = Some(node.clone());
        Ok(node)
    }

    /// The board capability of an uncaptured lambda. A closure's capability
    /// depends on runtime values and must be wired from the lambda node's
    /// `board` output instead.
    pub async fn capability(&self) -> Result<NodeValue, FlowError> {
        if self.captured {
            return Err(FlowError::InvalidCapability(
                "closure capability must be wired from the lambda node's board output".to_string(),
            ));
        }
        Ok(BoardCapability::new(self.board_descriptor().await?).into_value())
    }

    /// Serializes an uncaptured lambda into a portable descriptor.
    pub async fn serialize(
        &self,
        metadata: Option<GraphMetadata>,
    ) -> Result<GraphDescriptor, FlowError> {
        if self.captured {
            return Err(FlowError::InvalidCapability(
                "serialize the enclosing scope to export a closure".to_string(),
            ));
        }
        match &self.kind {
            LambdaKind::Graph { inner, .. } => {
                let root = inner.single_pinned()?;
                serialize_scope(inner, metadata, Some(&root)).await
            }
            LambdaKind::Function { .. } => {
                let mut descriptor = self.function_wrapper();
                if let Some(metadata) = metadata {
                    descriptor.url = metadata.url;
                    descriptor.title = metadata.title;
                    descriptor.description = metadata.description;
                    descriptor.version = metadata.version;
                }
                Ok(descriptor)
            }
        }
    }

    /// Instantiates the lambda as a node in `scope`. A captured lambda
    /// becomes an `invoke` node reading `$board` from the lambda node; an
    /// uncaptured one becomes a plain node backed by its handler.
    pub async fn node(
        &self,
        scope: &Arc<Scope>,
        configuration: Values,
    ) -> Result<NodeRef, FlowError> {
        if self.captured {
            let lambda_node = self.lambda_node().await?;
            scope.add_handler(INVOKE_TYPE, Arc::new(InvokeHandler));
            let node = scope.add_node(NodeSpec::new(INVOKE_TYPE).configuration(configuration));
            lambda_node.wire_to("board", &node, BOARD_KEY)?;
            Ok(node)
        } else {
            let handler: Arc<dyn NodeHandler> = match &self.kind {
                LambdaKind::Graph { handler, .. } => handler.clone(),
                LambdaKind::Function { handler } => handler.clone(),
            };
            scope.add_handler(&self.type_name, handler);
            Ok(scope.add_node(NodeSpec::new(&self.type_name).configuration(configuration)))
        }
    }

    async fn board_descriptor(&self) -> Result<GraphDescriptor, FlowError> {
        match &self.kind {
            LambdaKind::Graph { inner, .. } => {
                let root = inner.single_pinned()?;
                serialize_scope(inner, None, Some(&root)).await
            }
            LambdaKind::Function { .. } => Ok(self.function_wrapper()),
        }
    }

    /// A minimal `input -> node -> output` graph around a bare handler. The
    /// handler itself is not embeddable; whoever loads this descriptor needs
    /// the type registered.
    fn function_wrapper(&self) -> GraphDescriptor {
        let id = self.type_name.clone();
        GraphDescriptor {
            edges: vec![
                EdgeDescriptor {
                    from: format!("{id}-input"),
                    to: id.clone(),
                    out: WILDCARD_PORT.to_string(),
                    in_: String::new(),
                    constant: false,
                },
                EdgeDescriptor {
                    from: id.clone(),
                    to: format!("{id}-output"),
                    out: WILDCARD_PORT.to_string(),
                    in_: String::new(),
                    constant: false,
                },
            ],
            nodes: vec![
                NodeDescriptor {
                    id: format!("{id}-input"),
                    type_name: INPUT_TYPE.to_string(),
                    configuration: Values::new(),
                },
                NodeDescriptor {
                    id: id.clone(),
                    type_name: id.clone(),
                    configuration: Values::new(),
                },
                NodeDescriptor {
                    id: format!("{id}-output"),
                    type_name: OUTPUT_TYPE.to_string(),
                    configuration: Values::new(),
                },
            ],
            ..GraphDescriptor::default()
        }
    }
}

/// Handler backed by a finalized subgraph: invoking the node runs one round
/// over the graph.
pub(crate) struct GraphHandler {
    scope: Arc<Scope>,
    description: Option<NodeDescription>,
}

#[async_trait]
impl NodeHandler for GraphHandler {
    async fn invoke(&self, inputs: Values, scope: &Arc<Scope>) -> Result<Values, FlowError> {
        let root = self.scope.single_pinned()?;
        scope.invoke_one_round(inputs, &root).await
    }

    async fn describe(&self) -> Option<NodeDescription> {
        self.description.clone()
    }

    fn graph(&self) -> Option<Arc<Scope>> {
        Some(self.scope.clone())
    }
}

/// Handler of the materialized lambda node: emits the board capability,
/// merging any captured runtime inputs into the board's bound `args`.
struct LambdaHandler;

#[async_trait]
impl NodeHandler for LambdaHandler {
    async fn invoke(&self, inputs: Values, _scope: &Arc<Scope>) -> Result<Values, FlowError> {
        let board = inputs.get("board").ok_or_else(|| {
            FlowError::InvalidCapability("lambda node without a board".to_string())
        })?;
        let mut capability = BoardCapability::from_value(board).ok_or_else(|| {
            FlowError::InvalidCapability("lambda board is not a capability".to_string())
        })?;
        for (key, value) in &inputs {
            if key != "board" {
                capability.board.args.insert(key.clone(), value.clone());
            }
        }
        let mut outputs = Values::new();
        outputs.insert("board".to_string(), capability.into_value());
        Ok(outputs)
    }
}

/// Handler of `invoke` nodes: rebuilds the scope behind a `$board` capability
/// and runs one round over it with the remaining inputs, the board's bound
/// `args` taking precedence.
struct InvokeHandler;

#[async_trait]
impl NodeHandler for InvokeHandler {
    async fn invoke(&self, mut inputs: Values, scope: &Arc<Scope>) -> Result<Values, FlowError> {
        let board = inputs.remove(BOARD_KEY).ok_or_else(|| {
            FlowError::InvalidCapability("invoke node without $board".to_string())
        })?;
        let capability = BoardCapability::from_value(&board).ok_or_else(|| {
            FlowError::InvalidCapability("$board is not a board capability".to_string())
        })?;
        let child = Scope::from_descriptor(
            &capability.board,
            ScopeConfig {
                lexical_parent: None,
                dynamic_parent: Some(scope.clone()),
            },
        )?;
        let mut round_inputs = inputs;
        round_inputs.extend(capability.board.args.clone());
        let root = child.single_pinned()?;
        scope.invoke_one_round(round_inputs, &root).await
    }
}

/// Registers the engine-internal `invoke`/`lambda` handlers on a scope.
pub(crate) fn register_core_handlers(scope: &Arc<Scope>) {
    scope.add_handler(INVOKE_TYPE, Arc::new(InvokeHandler));
    scope.add_handler(LAMBDA_TYPE, Arc::new(LambdaHandler));
}
