//! Run-event stream: observe node executions as an async stream.
//!
//! A thin adapter over the callback hooks: attaching a stream registers an
//! `after` hook that forwards one event per executed node into a channel.
//! The stream stays attached for the scope's lifetime and observes every
//! subsequent run.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::callbacks::{InvokeCallbacks, NodeInfo};
use crate::graph::Distribution;
use crate::scope::Scope;
use crate::value::Values;

/// One executed node, as seen by an attached event stream.
#[derive(Clone, Debug)]
pub struct RunEvent {
    /// String id of the node that ran.
    pub node: String,
    pub type_name: String,
    /// The node's result, before distribution.
    pub outputs: Values,
    /// Result keys no outgoing wire consumed.
    pub unused: Vec<String>,
}

/// Factory for run-event streams.
pub struct EventStream;

impl EventStream {
    /// Registers an observer on `scope` and returns the receiving stream.
    pub fn attach(scope: &Scope) -> ReceiverStream<RunEvent> {
        let (sender, receiver) = mpsc::channel(128);
        scope.add_callback(Arc::new(EventForwarder { sender }));
        ReceiverStream::new(receiver)
    }
}

struct EventForwarder {
    sender: mpsc::Sender<RunEvent>,
}

#[async_trait]
impl InvokeCallbacks for EventForwarder {
    async fn after(
        &self,
        _scope: &Arc<Scope>,
        node: &NodeInfo,
        _inputs: &Values,
        outputs: &Values,
        distribution: &Distribution,
    ) {
        let _ = self
            .sender
            .send(RunEvent {
                node: node.id.clone(),
                type_name: node.type_name.clone(),
                outputs: outputs.clone(),
                unused: distribution.unused.clone(),
            })
            .await;
    }
}
