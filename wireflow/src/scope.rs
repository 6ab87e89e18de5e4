//! Scope: handler registry, pinned roots, callbacks, and the execution loop.
//!
//! A scope owns one graph arena plus everything needed to run it: a
//! type-name→handler table with parent-chain lookup, the list of pinned
//! execution roots, and registered invocation hooks. Scopes form two
//! read-only parent chains — lexical (where a graph was declared) and dynamic
//! (who is invoking it right now) — consulted in that order after the scope's
//! own handler table.
//!
//! Scheduling is cooperative and strictly sequential: one ready node at a
//! time, results fully distributed before the next dequeue. Internal state is
//! guarded by short mutex sections that are never held across an await.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::callbacks::{InvokeCallbacks, NodeInfo};
use crate::descriptor::GraphDescriptor;
use crate::error::FlowError;
use crate::graph::{logging, Graph, NodeId, Scheduler, CONTROL_PORT, WILDCARD_PORT};
use crate::handler::NodeHandler;
use crate::lambda::{register_core_handlers, ClosureEdge};
use crate::value::{error_value, BoardCapability, NodeValue, Values, BOARD_KEY, ERROR_KEY, STATE_KEY};

/// Type name of input nodes (values enter a graph here).
pub const INPUT_TYPE: &str = "input";

/// Type name of output nodes (values leave a graph here).
pub const OUTPUT_TYPE: &str = "output";

const POISONED: &str = "scope state poisoned";

/// Construction parameters for a scope.
#[derive(Clone, Default)]
pub struct ScopeConfig {
    /// Scope in which this scope was structurally declared; consulted last
    /// for handler lookup and used to resolve closure captures.
    pub lexical_parent: Option<Arc<Scope>>,
    /// The caller's scope at run time; shadows lexical registrations.
    pub dynamic_parent: Option<Arc<Scope>>,
}

/// Specification of a node to add to a scope.
pub struct NodeSpec {
    type_name: String,
    id: Option<String>,
    configuration: Values,
    schema: Option<NodeValue>,
}

impl NodeSpec {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: None,
            configuration: Values::new(),
            schema: None,
        }
    }

    /// Explicit node id; defaults to `<type>-<n>` vended by the scope.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Adds one configuration entry.
    pub fn config(mut self, key: impl Into<String>, value: NodeValue) -> Self {
        self.configuration.insert(key.into(), value);
        self
    }

    /// Replaces the whole configuration map.
    pub fn configuration(mut self, configuration: Values) -> Self {
        self.configuration = configuration;
        self
    }

    /// Explicit schema hint; suppresses serialization-time inference.
    pub fn schema(mut self, schema: NodeValue) -> Self {
        self.schema = Some(schema);
        self
    }
}

/// A node addressed together with the scope that owns it. Wiring across
/// scopes is how closure captures are detected.
#[derive(Clone)]
pub struct NodeRef {
    pub(crate) scope: Arc<Scope>,
    pub(crate) id: NodeId,
}

impl NodeRef {
    /// The node's string id.
    pub fn id(&self) -> String {
        self.scope.graph_state().node(self.id).id.clone()
    }

    pub fn type_name(&self) -> String {
        self.scope.graph_state().node(self.id).type_name.clone()
    }

    pub fn configuration(&self) -> Values {
        self.scope.graph_state().node(self.id).configuration.clone()
    }

    pub fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    pub(crate) fn node_id(&self) -> NodeId {
        self.id
    }

    /// Marks the node as an execution/serialization root of its scope.
    pub fn pin(&self) {
        self.scope.pinned.lock().expect(POISONED).push(self.id);
    }

    /// Wires `self.out` to `to.in_`.
    ///
    /// Within one scope this adds an ordinary edge. From an ancestor scope
    /// into a nested one it records a closure edge instead, resolved when the
    /// nested graph is finalized; such wires must name their ports.
    pub fn wire_to(&self, out: &str, to: &NodeRef, in_: &str) -> Result<(), FlowError> {
        self.wire(out, to, in_, false, None)
    }

    /// Like [`NodeRef::wire_to`], but the delivered value survives being read
    /// and can be consumed again on later runs of the destination.
    pub fn wire_to_constant(&self, out: &str, to: &NodeRef, in_: &str) -> Result<(), FlowError> {
        self.wire(out, to, in_, true, None)
    }

    /// Like [`NodeRef::wire_to`], with a schema fragment for the wire.
    pub fn wire_to_described(
        &self,
        out: &str,
        to: &NodeRef,
        in_: &str,
        schema: NodeValue,
    ) -> Result<(), FlowError> {
        self.wire(out, to, in_, false, Some(schema))
    }

    fn wire(
        &self,
        out: &str,
        to: &NodeRef,
        in_: &str,
        constant: bool,
        schema: Option<NodeValue>,
    ) -> Result<(), FlowError> {
        if Arc::ptr_eq(&self.scope, &to.scope) {
            to.scope
                .graph_state()
                .add_edge(self.id, out, to.id, in_, constant, schema);
            return Ok(());
        }

        if out == WILDCARD_PORT || out == CONTROL_PORT {
            return Err(FlowError::UnnamedClosureWire);
        }
        // The source scope must be an ancestor on the lexical chain.
        let mut scope = to.scope.clone();
        loop {
            match scope.lexical_parent.clone() {
                Some(parent) if Arc::ptr_eq(&parent, &self.scope) => break,
                Some(parent) => scope = parent,
                None => return Err(FlowError::ForeignWire),
            }
        }
        to.scope
            .closure_edges
            .lock()
            .expect(POISONED)
            .push(ClosureEdge {
                from_scope: self.scope.clone(),
                from: self.id,
                to: to.id,
                out: out.to_string(),
                in_: in_.to_string(),
            });
        Ok(())
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef").field("id", &self.id()).finish()
    }
}

/// An execution and registration context owning root nodes, handlers, and
/// callbacks.
pub struct Scope {
    graph: Mutex<Graph>,
    pinned: Mutex<Vec<NodeId>>,
    handlers: Mutex<HashMap<String, Arc<dyn NodeHandler>>>,
    callbacks: Mutex<Vec<Arc<dyn InvokeCallbacks>>>,
    closure_edges: Mutex<Vec<ClosureEdge>>,
    lexical_parent: Option<Arc<Scope>>,
    dynamic_parent: Option<Arc<Scope>>,
    counter: AtomicU64,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope").finish_non_exhaustive()
    }
}

impl Scope {
    pub fn new(config: ScopeConfig) -> Arc<Self> {
        Arc::new(Self {
            graph: Mutex::new(Graph::new()),
            pinned: Mutex::new(Vec::new()),
            handlers: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(Vec::new()),
            closure_edges: Mutex::new(Vec::new()),
            lexical_parent: config.lexical_parent,
            dynamic_parent: config.dynamic_parent,
            counter: AtomicU64::new(0),
        })
    }

    /// Rebuilds a scope from a portable descriptor, resolving `path: "#<id>"`
    /// subgraph references through the descriptor's `graphs` map and pinning
    /// the first node.
    pub fn from_descriptor(
        descriptor: &GraphDescriptor,
        config: ScopeConfig,
    ) -> Result<Arc<Self>, FlowError> {
        let scope = Scope::new(config);
        register_core_handlers(&scope);

        let mut refs: HashMap<String, NodeRef> = HashMap::new();
        for node in &descriptor.nodes {
            let mut configuration = node.configuration.clone();
            let path = configuration
                .get("path")
                .and_then(NodeValue::as_str)
                .map(str::to_string);
            if let Some(path) = path {
                if let Some(subgraph) =
                    path.strip_prefix('#').and_then(|id| descriptor.graphs.get(id))
                {
                    configuration.insert(
                        BOARD_KEY.to_string(),
                        BoardCapability::new(subgraph.clone()).into_value(),
                    );
                    configuration.remove("path");
                }
            }
            let node_ref = scope.add_node(
                NodeSpec::new(&node.type_name)
                    .id(&node.id)
                    .configuration(configuration),
            );
            refs.insert(node.id.clone(), node_ref);
        }
        for edge in &descriptor.edges {
            let from = refs
                .get(&edge.from)
                .ok_or_else(|| FlowError::UnknownNode(edge.from.clone()))?;
            let to = refs
                .get(&edge.to)
                .ok_or_else(|| FlowError::UnknownNode(edge.to.clone()))?;
            if edge.constant {
                from.wire_to_constant(&edge.out, to, &edge.in_)?;
            } else {
                from.wire_to(&edge.out, to, &edge.in_)?;
            }
        }
        if let Some(first) = descriptor.nodes.first() {
            refs[&first.id].pin();
        }
        Ok(scope)
    }

    /// Adds a node to this scope's graph.
    pub fn add_node(self: &Arc<Self>, spec: NodeSpec) -> NodeRef {
        let id = spec
            .id
            .unwrap_or_else(|| self.vend(&spec.type_name));
        let node = self.graph_state().add_node(
            id,
            spec.type_name,
            spec.configuration,
            spec.schema,
        );
        NodeRef {
            scope: self.clone(),
            id: node,
        }
    }

    /// Merges handler registrations into this scope's own table; later
    /// registrations for the same type overwrite.
    pub fn add_handlers(
        &self,
        handlers: impl IntoIterator<Item = (String, Arc<dyn NodeHandler>)>,
    ) {
        self.handlers.lock().expect(POISONED).extend(handlers);
    }

    pub fn add_handler(&self, type_name: impl Into<String>, handler: Arc<dyn NodeHandler>) {
        self.handlers
            .lock()
            .expect(POISONED)
            .insert(type_name.into(), handler);
    }

    /// Resolves a handler: own table, then the dynamic parent chain, then the
    /// lexical parent chain. The dynamic parent represents the immediate
    /// caller context and deliberately shadows lexically-enclosing
    /// definitions.
    pub fn get_handler(&self, type_name: &str) -> Option<Arc<dyn NodeHandler>> {
        if let Some(handler) = self.handlers.lock().expect(POISONED).get(type_name) {
            return Some(handler.clone());
        }
        if let Some(handler) = self
            .dynamic_parent
            .as_ref()
            .and_then(|parent| parent.get_handler(type_name))
        {
            return Some(handler);
        }
        self.lexical_parent
            .as_ref()
            .and_then(|parent| parent.get_handler(type_name))
    }

    /// Registers an invocation hook.
    pub fn add_callback(&self, callback: Arc<dyn InvokeCallbacks>) {
        self.callbacks.lock().expect(POISONED).push(callback);
    }

    /// The pinned roots, in insertion order.
    pub fn pinned_nodes(self: &Arc<Self>) -> Vec<NodeRef> {
        self.pinned
            .lock()
            .expect(POISONED)
            .iter()
            .map(|&id| NodeRef {
                scope: self.clone(),
                id,
            })
            .collect()
    }

    /// Drops every pinned node already covered by an earlier pin's connected
    /// component. Afterwards pinned nodes are pairwise disjoint by
    /// connectivity.
    pub fn compact_pins(&self) {
        let graph = self.graph.lock().expect(POISONED);
        let mut pinned = self.pinned.lock().expect(POISONED);
        let mut kept = Vec::new();
        let mut covered: HashSet<NodeId> = HashSet::new();
        for &node in pinned.iter() {
            if covered.contains(&node) {
                continue;
            }
            kept.push(node);
            covered.extend(graph.connected_component(node));
        }
        *pinned = kept;
    }

    /// The single pinned root of a finalized subgraph.
    pub fn single_pinned(self: &Arc<Self>) -> Result<NodeRef, FlowError> {
        let pinned = self.pinned_nodes();
        match pinned.len() {
            1 => Ok(pinned.into_iter().next().expect("one pinned node")),
            0 => Err(FlowError::EmptyGraph),
            n => Err(FlowError::DisjointGraphs(
                n,
                pinned.iter().map(NodeRef::id).collect(),
            )),
        }
    }

    /// Runs all pinned roots to completion.
    pub async fn invoke(self: &Arc<Self>) -> Result<(), FlowError> {
        let seeds: Vec<NodeId> = self.pinned.lock().expect(POISONED).clone();
        let mut state = Scheduler::new();
        self.run(self, &seeds, &mut state).await
    }

    /// Runs the connected component of one node to completion. The node may
    /// belong to another scope's graph; handlers still resolve through this
    /// scope's chain.
    pub async fn invoke_node(self: &Arc<Self>, node: &NodeRef) -> Result<(), FlowError> {
        let mut state = Scheduler::new();
        self.run(&node.scope, &[node.id], &mut state).await
    }

    /// Continues a run from previously captured scheduler state, seeding
    /// nothing.
    pub async fn resume(self: &Arc<Self>, state: &mut Scheduler) -> Result<(), FlowError> {
        self.run(self, &[], state).await
    }

    /// One synchronous request/response round over a graph, for embedding one
    /// graph inside another as a single call.
    ///
    /// A transient child scope (dynamic parent = this scope) supplies
    /// synthetic `input`/`output` handlers: `input` returns `inputs`, the
    /// first `output` firing resolves the round and halts the loop. If no
    /// output is ever reached the round resolves to a `$error` value naming
    /// the last node executed. If the loop halted with work still queued, the
    /// result carries the scheduler snapshot under `$state`; passing
    /// `{ "$state": ... }` back in resumes the round.
    pub async fn invoke_one_round(
        self: &Arc<Self>,
        mut inputs: Values,
        node: &NodeRef,
    ) -> Result<Values, FlowError> {
        let scope = Scope::new(ScopeConfig {
            lexical_parent: Some(node.scope.clone()),
            dynamic_parent: Some(self.clone()),
        });

        let resumed = inputs.remove(STATE_KEY);
        let mut state = match &resumed {
            Some(snapshot) => Scheduler::restore(&node.scope.graph_state(), snapshot)?,
            None => Scheduler::new(),
        };
        let seeds = if resumed.is_some() {
            Vec::new()
        } else {
            vec![node.id]
        };

        let (sender, receiver) = oneshot::channel();
        let shared = Arc::new(RoundShared {
            resolver: Mutex::new(Some(sender)),
            fired: AtomicBool::new(false),
            last_node: Mutex::new(None),
            incomplete: Mutex::new(BTreeMap::new()),
        });

        scope.add_handler(INPUT_TYPE, Arc::new(RoundInput { inputs }));
        scope.add_handler(
            OUTPUT_TYPE,
            Arc::new(RoundOutput {
                shared: shared.clone(),
            }),
        );
        scope.add_callback(Arc::new(RoundCallbacks {
            shared: shared.clone(),
        }));

        let run_result = scope.run(&node.scope, &seeds, &mut state).await;
        if let Err(error) = run_result {
            if !shared.fired.load(Ordering::SeqCst) {
                let mut outputs = Values::new();
                outputs.insert(ERROR_KEY.to_string(), error_value(&error.to_string()));
                return Ok(outputs);
            }
        }

        let mut outputs = receiver
            .await
            .map_err(|_| FlowError::ExecutionFailed("round resolver dropped".to_string()))?;
        if !state.done() {
            outputs.insert(
                STATE_KEY.to_string(),
                state.snapshot(&node.scope.graph_state()),
            );
        }
        Ok(outputs)
    }

    /// The execution loop. `graph_scope` owns the arena being executed;
    /// `self` resolves handlers and hooks.
    pub(crate) async fn run(
        self: &Arc<Self>,
        graph_scope: &Arc<Scope>,
        seeds: &[NodeId],
        state: &mut Scheduler,
    ) -> Result<(), FlowError> {
        logging::log_invoke_start();
        {
            let graph = graph_scope.graph.lock().expect(POISONED);
            let mut seen: HashSet<NodeId> = HashSet::new();
            for &seed in seeds {
                for member in graph.connected_component(seed) {
                    if seen.insert(member) && state.missing_inputs(&graph, member).is_none() {
                        state.queue_up(member);
                    }
                }
            }
        }

        let result = self.run_loop(graph_scope, state).await;
        // Always runs, success or failure: done hooks registered directly on
        // this scope (not inherited from ancestors).
        for callback in self.own_callbacks().iter().rev() {
            callback.done().await;
        }
        match &result {
            Ok(()) => logging::log_invoke_complete(),
            Err(error) => logging::log_invoke_error(error),
        }
        result
    }

    async fn run_loop(
        self: &Arc<Self>,
        graph_scope: &Arc<Scope>,
        state: &mut Scheduler,
    ) -> Result<(), FlowError> {
        'run: while !state.done() {
            for hook in self.stop_chain() {
                if hook.stop().await {
                    break 'run;
                }
            }
            let Some(node_id) = state.next() else {
                break;
            };

            let (info, inputs) = {
                let graph = graph_scope.graph.lock().expect(POISONED);
                let node = graph.node(node_id);
                let info = NodeInfo {
                    id: node.id.clone(),
                    type_name: node.type_name.clone(),
                    configuration: node.configuration.clone(),
                };
                let inputs = state.shift_inputs(&graph, node_id);
                (info, inputs)
            };
            logging::log_node_start(&info.id, &info.type_name);

            let mut result = None;
            for hook in self.own_callbacks().iter().rev() {
                if let Some(outputs) = hook.before(&info, &inputs).await {
                    result = Some(outputs);
                    break;
                }
            }
            let result = match result {
                Some(outputs) => outputs,
                None => {
                    let handler = self
                        .get_handler(&info.type_name)
                        .ok_or_else(|| FlowError::HandlerNotFound(info.type_name.clone()))?;
                    match handler.invoke(inputs.clone(), self).await {
                        Ok(outputs) => outputs,
                        Err(error) => {
                            let mut outputs = Values::new();
                            outputs
                                .insert(ERROR_KEY.to_string(), error_value(&error.to_string()));
                            outputs
                        }
                    }
                }
            };

            let distribution = {
                let graph = graph_scope.graph.lock().expect(POISONED);
                state.process_result(&graph, node_id, &result)
            };
            logging::log_node_complete(&info.id, &distribution);
            for hook in self.own_callbacks().iter().rev() {
                hook.after(self, &info, &inputs, &result, &distribution).await;
            }

            if distribution.unused.iter().any(|key| key == ERROR_KEY) {
                let message = result
                    .get(ERROR_KEY)
                    .and_then(crate::value::error_message)
                    .unwrap_or("unknown error")
                    .to_string();
                return Err(FlowError::NodeFailed {
                    node: info.id,
                    message,
                });
            }
        }
        Ok(())
    }

    pub fn lexical_parent(&self) -> Option<&Arc<Scope>> {
        self.lexical_parent.as_ref()
    }

    pub fn dynamic_parent(&self) -> Option<&Arc<Scope>> {
        self.dynamic_parent.as_ref()
    }

    pub(crate) fn graph_state(&self) -> MutexGuard<'_, Graph> {
        self.graph.lock().expect(POISONED)
    }

    pub(crate) fn pinned_ids(&self) -> Vec<NodeId> {
        self.pinned.lock().expect(POISONED).clone()
    }

    pub(crate) fn take_closure_edges(&self) -> Vec<ClosureEdge> {
        std::mem::take(&mut *self.closure_edges.lock().expect(POISONED))
    }

    pub(crate) fn push_closure_edge(&self, edge: ClosureEdge) {
        self.closure_edges.lock().expect(POISONED).push(edge);
    }

    pub(crate) fn vend(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.counter.fetch_add(1, Ordering::Relaxed))
    }

    fn own_callbacks(&self) -> Vec<Arc<dyn InvokeCallbacks>> {
        self.callbacks.lock().expect(POISONED).clone()
    }

    /// Stop hooks of this scope and every dynamic ancestor, most recently
    /// added first.
    fn stop_chain(&self) -> Vec<Arc<dyn InvokeCallbacks>> {
        let mut hooks = self.own_callbacks();
        hooks.reverse();
        let mut parent = self.dynamic_parent.clone();
        while let Some(scope) = parent {
            let mut own = scope.own_callbacks();
            own.reverse();
            hooks.extend(own);
            parent = scope.dynamic_parent.clone();
        }
        hooks
    }
}

/// Shared state of one nested round: the write-once output slot and the
/// diagnostics the hooks collect.
struct RoundShared {
    resolver: Mutex<Option<oneshot::Sender<Values>>>,
    fired: AtomicBool,
    last_node: Mutex<Option<String>>,
    incomplete: Mutex<BTreeMap<String, Vec<String>>>,
}

impl RoundShared {
    /// First write wins; later writes find the sender gone and are dropped.
    fn resolve(&self, values: Values) {
        if let Some(sender) = self.resolver.lock().expect(POISONED).take() {
            let _ = sender.send(values);
        }
    }
}

struct RoundInput {
    inputs: Values,
}

#[async_trait]
impl NodeHandler for RoundInput {
    async fn invoke(&self, _inputs: Values, _scope: &Arc<Scope>) -> Result<Values, FlowError> {
        Ok(self.inputs.clone())
    }
}

struct RoundOutput {
    shared: Arc<RoundShared>,
}

#[async_trait]
impl NodeHandler for RoundOutput {
    async fn invoke(&self, inputs: Values, _scope: &Arc<Scope>) -> Result<Values, FlowError> {
        self.shared.fired.store(true, Ordering::SeqCst);
        self.shared.resolve(inputs);
        Ok(Values::new())
    }
}

struct RoundCallbacks {
    shared: Arc<RoundShared>,
}

#[async_trait]
impl InvokeCallbacks for RoundCallbacks {
    async fn after(
        &self,
        _scope: &Arc<Scope>,
        node: &NodeInfo,
        _inputs: &Values,
        _outputs: &Values,
        distribution: &crate::graph::Distribution,
    ) {
        *self.shared.last_node.lock().expect(POISONED) = Some(node.id.clone());
        let mut incomplete = self.shared.incomplete.lock().expect(POISONED);
        for delivery in &distribution.nodes {
            match &delivery.missing {
                Some(missing) => {
                    incomplete.insert(delivery.node.clone(), missing.clone());
                }
                None => {
                    incomplete.remove(&delivery.node);
                }
            }
        }
    }

    async fn stop(&self) -> bool {
        self.shared.fired.load(Ordering::SeqCst)
    }

    async fn done(&self) {
        if self.shared.fired.load(Ordering::SeqCst) {
            return;
        }
        let last = self
            .shared
            .last_node
            .lock()
            .expect(POISONED)
            .clone()
            .unwrap_or_else(|| "(none)".to_string());
        let mut message = format!("Output node never reached. Last node executed: {last}.");
        let incomplete = self.shared.incomplete.lock().expect(POISONED);
        if !incomplete.is_empty() {
            let waiting: Vec<String> = incomplete
                .iter()
                .map(|(node, missing)| format!("{} (missing {})", node, missing.join(", ")))
                .collect();
            message.push_str(&format!(" Nodes not ready: {}.", waiting.join("; ")));
        }
        let mut outputs = Values::new();
        outputs.insert(ERROR_KEY.to_string(), error_value(&message));
        self.shared.resolve(outputs);
    }
}
