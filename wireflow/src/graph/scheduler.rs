//! Scheduler state: readiness queue, input buffers, fan-out distribution.
//!
//! One `Scheduler` tracks a single run: which nodes are ready (FIFO over the
//! order they became ready), the values buffered at each node's in-ports, and
//! which constant values survive being read. Results are distributed fully
//! before the next node is dequeued, so readiness is only ever recomputed at
//! seed time and at delivery time.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::FlowError;
use crate::value::{NodeValue, Values};

use super::node::{Graph, NodeId, CONTROL_PORT, WILDCARD_PORT};

/// One receiving node of a distribution step.
#[derive(Clone, Debug)]
pub struct Delivery {
    /// String id of the receiving node.
    pub node: String,
    /// Port names a value was buffered under.
    pub received: Vec<String>,
    /// `None` when the receiver became ready; otherwise the inputs it still
    /// waits for (the control requirement shows up as an empty name).
    pub missing: Option<Vec<String>>,
}

/// Where one node's outputs went: receiving nodes plus the result keys no
/// outgoing wire consumed.
#[derive(Clone, Debug, Default)]
pub struct Distribution {
    pub nodes: Vec<Delivery>,
    pub unused: Vec<String>,
}

/// Per-run scheduling state.
#[derive(Debug, Default)]
pub struct Scheduler {
    queue: VecDeque<NodeId>,
    queued: HashSet<NodeId>,
    inputs: HashMap<NodeId, Values>,
    constants: HashMap<NodeId, Values>,
    /// Nodes that received a control or wildcard delivery since they last ran.
    triggered: HashSet<NodeId>,
    /// Nodes that ran at least once.
    completed: HashSet<NodeId>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a node for execution. Deduplicated: a node already waiting
    /// keeps its original queue position.
    pub fn queue_up(&mut self, node: NodeId) {
        if self.queued.insert(node) {
            self.queue.push_back(node);
        }
    }

    /// Removes and returns the next ready node, FIFO over insertion order.
    pub fn next(&mut self) -> Option<NodeId> {
        let node = self.queue.pop_front()?;
        self.queued.remove(&node);
        Some(node)
    }

    /// True when no more nodes are queued.
    pub fn done(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns the in-ports a node still waits for, or `None` when it is
    /// ready to run.
    ///
    /// Required are the `in_` names of named incoming edges; a node with
    /// control or wildcard incoming edges additionally needs at least one of
    /// them to have delivered since the node last ran (reported as an empty
    /// name). A node with no incoming edges is ready before its first run and
    /// never again after.
    pub fn missing_inputs(&self, graph: &Graph, node: NodeId) -> Option<Vec<String>> {
        if graph.incoming(node).next().is_none() {
            return if self.completed.contains(&node) {
                Some(Vec::new())
            } else {
                None
            };
        }

        let mut present: HashSet<&str> = HashSet::new();
        if let Some(values) = self.inputs.get(&node) {
            present.extend(values.keys().map(String::as_str));
        }
        if let Some(values) = self.constants.get(&node) {
            present.extend(values.keys().map(String::as_str));
        }

        let mut missing = Vec::new();
        let mut needs_trigger = false;
        for edge in graph.incoming(node) {
            match edge.out.as_str() {
                WILDCARD_PORT | CONTROL_PORT => needs_trigger = true,
                _ => {
                    if !present.contains(edge.in_.as_str()) && !missing.contains(&edge.in_) {
                        missing.push(edge.in_.clone());
                    }
                }
            }
        }
        if needs_trigger && !self.triggered.contains(&node) {
            missing.push(String::new());
        }

        if missing.is_empty() {
            None
        } else {
            Some(missing)
        }
    }

    /// Returns the buffered input bundle for a node: configuration under
    /// constants under pending values. Pending values and delivery markers
    /// are drained; constants are retained for future reads.
    pub fn shift_inputs(&mut self, graph: &Graph, node: NodeId) -> Values {
        let mut values = graph.node(node).configuration.clone();
        if let Some(constants) = self.constants.get(&node) {
            values.extend(constants.clone());
        }
        if let Some(pending) = self.inputs.remove(&node) {
            values.extend(pending);
        }
        self.triggered.remove(&node);
        self.completed.insert(node);
        values
    }

    /// Fans a node's result out along its outgoing edges.
    ///
    /// Named edges deliver the matching result key under their `in_` name;
    /// wildcard edges deliver every key; control edges deliver a bare
    /// trigger. Receivers that became ready are enqueued. Keys delivered by
    /// no edge are reported as `unused`.
    pub fn process_result(&mut self, graph: &Graph, node: NodeId, result: &Values) -> Distribution {
        let mut consumed: HashSet<String> = HashSet::new();
        let mut receivers: Vec<(NodeId, Vec<String>)> = Vec::new();

        for edge in graph.outgoing(node) {
            let mut delivered = Values::new();
            let mut trigger = false;
            match edge.out.as_str() {
                WILDCARD_PORT => {
                    for (key, value) in result {
                        delivered.insert(key.clone(), value.clone());
                        consumed.insert(key.clone());
                    }
                    trigger = true;
                }
                CONTROL_PORT => trigger = true,
                out => match result.get(out) {
                    Some(value) => {
                        consumed.insert(out.to_string());
                        delivered.insert(edge.in_.clone(), value.clone());
                    }
                    None => continue,
                },
            }

            if edge.constant {
                self.constants
                    .entry(edge.to)
                    .or_default()
                    .extend(delivered.clone());
            }
            self.inputs
                .entry(edge.to)
                .or_default()
                .extend(delivered.clone());
            if trigger {
                self.triggered.insert(edge.to);
            }

            let keys: Vec<String> = delivered.keys().cloned().collect();
            match receivers.iter_mut().find(|(to, _)| *to == edge.to) {
                Some((_, received)) => received.extend(keys),
                None => receivers.push((edge.to, keys)),
            }
        }

        let mut distribution = Distribution::default();
        for (to, received) in receivers {
            let missing = self.missing_inputs(graph, to);
            if missing.is_none() {
                self.queue_up(to);
            }
            distribution.nodes.push(Delivery {
                node: graph.node(to).id.clone(),
                received,
                missing,
            });
        }
        distribution.unused = result
            .keys()
            .filter(|key| !consumed.contains(*key))
            .cloned()
            .collect();
        distribution
    }

    /// Serializes the buffered state keyed by node string ids, so a
    /// suspended run can be carried as a value and resumed later.
    pub fn snapshot(&self, graph: &Graph) -> NodeValue {
        let name = |node: &NodeId| graph.node(*node).id.clone();
        let snapshot = SchedulerSnapshot {
            queue: self.queue.iter().map(name).collect(),
            inputs: self.inputs.iter().map(|(k, v)| (name(k), v.clone())).collect(),
            constants: self
                .constants
                .iter()
                .map(|(k, v)| (name(k), v.clone()))
                .collect(),
            triggered: self.triggered.iter().map(name).collect(),
            completed: self.completed.iter().map(name).collect(),
        };
        serde_json::to_value(snapshot).expect("snapshot serializes to JSON")
    }

    /// Rebuilds a scheduler from a [`Scheduler::snapshot`] value.
    pub fn restore(graph: &Graph, value: &NodeValue) -> Result<Self, FlowError> {
        let snapshot: SchedulerSnapshot = serde_json::from_value(value.clone())
            .map_err(|e| FlowError::InvalidSnapshot(e.to_string()))?;
        let resolve = |id: &str| {
            graph
                .find(id)
                .ok_or_else(|| FlowError::InvalidSnapshot(format!("unknown node {id}")))
        };

        let mut state = Scheduler::new();
        for id in &snapshot.queue {
            state.queue_up(resolve(id)?);
        }
        for (id, values) in &snapshot.inputs {
            state.inputs.insert(resolve(id)?, values.clone());
        }
        for (id, values) in &snapshot.constants {
            state.constants.insert(resolve(id)?, values.clone());
        }
        for id in &snapshot.triggered {
            state.triggered.insert(resolve(id)?);
        }
        for id in &snapshot.completed {
            state.completed.insert(resolve(id)?);
        }
        Ok(state)
    }
}

#[derive(Serialize, Deserialize)]
struct SchedulerSnapshot {
    queue: Vec<String>,
    inputs: BTreeMap<String, Values>,
    constants: BTreeMap<String, Values>,
    triggered: Vec<String>,
    completed: Vec<String>,
}
