//! Node handler contract and function adapters.
//!
//! Handlers are supplied by external node-type libraries and registered on a
//! scope by type name. The engine only ever calls `invoke` (and `describe`
//! during serialization); what a handler does with its inputs is its own
//! business.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::FlowError;
use crate::scope::Scope;
use crate::value::{NodeValue, Values};

/// Port schemas reported by a handler's `describe`.
#[derive(Clone, Debug)]
pub struct NodeDescription {
    pub input_schema: NodeValue,
    pub output_schema: NodeValue,
}

/// Behavior of one node type.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Runs the node: consumes the buffered input bundle, produces outputs.
    /// A returned error is converted into a `$error` output by the loop, not
    /// propagated.
    async fn invoke(&self, inputs: Values, scope: &Arc<Scope>) -> Result<Values, FlowError>;

    /// Optional port schemas, consulted by serialization-time inference.
    async fn describe(&self) -> Option<NodeDescription> {
        None
    }

    /// The subgraph backing this handler, if it wraps one.
    fn graph(&self) -> Option<Arc<Scope>> {
        None
    }
}

type AsyncHandlerFn =
    dyn Fn(Values, Arc<Scope>) -> BoxFuture<'static, Result<Values, FlowError>> + Send + Sync;

/// Wraps a plain function as a [`NodeHandler`].
pub struct FnHandler {
    function: Box<AsyncHandlerFn>,
    description: Option<NodeDescription>,
}

impl FnHandler {
    /// Wraps a synchronous function of the inputs.
    pub fn new<F>(function: F) -> Self
    where
        F: Fn(Values) -> Result<Values, FlowError> + Send + Sync + 'static,
    {
        Self {
            function: Box::new(move |inputs, _scope| {
                let result = function(inputs);
                Box::pin(async move { result })
            }),
            description: None,
        }
    }

    /// Wraps an async function of the inputs and the executing scope.
    pub fn new_async<F>(function: F) -> Self
    where
        F: Fn(Values, Arc<Scope>) -> BoxFuture<'static, Result<Values, FlowError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            function: Box::new(function),
            description: None,
        }
    }

    /// Attaches port schemas reported via `describe`.
    pub fn with_description(mut self, description: NodeDescription) -> Self {
        self.description = Some(description);
        self
    }
}

#[async_trait]
impl NodeHandler for FnHandler {
    async fn invoke(&self, inputs: Values, scope: &Arc<Scope>) -> Result<Values, FlowError> {
        (self.function)(inputs, scope.clone()).await
    }

    async fn describe(&self) -> Option<NodeDescription> {
        self.description.clone()
    }
}
