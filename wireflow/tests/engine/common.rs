//! Shared helpers for engine integration tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use wireflow::{FlowError, FnHandler, NodeHandler, NodeValue, Scope, Values};

/// Builds a `Values` map out of a JSON object literal.
pub fn values(json: NodeValue) -> Values {
    json.as_object().cloned().expect("object literal")
}

/// Handler producing the same fixed result every run.
pub fn emit(json: NodeValue) -> Arc<dyn NodeHandler> {
    let fixed = values(json);
    Arc::new(FnHandler::new(move |_inputs| Ok(fixed.clone())))
}

/// Handler echoing its inputs unchanged.
pub fn echo() -> Arc<dyn NodeHandler> {
    Arc::new(FnHandler::new(|inputs| Ok(inputs)))
}

/// Handler failing with a fixed message.
pub fn fail(message: &str) -> Arc<dyn NodeHandler> {
    let message = message.to_string();
    Arc::new(FnHandler::new(move |_inputs| {
        Err(FlowError::ExecutionFailed(message.clone()))
    }))
}

/// Handler echoing its inputs while recording every call.
pub struct Recorder {
    seen: Mutex<Vec<Values>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Values> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeHandler for Recorder {
    async fn invoke(&self, inputs: Values, _scope: &Arc<Scope>) -> Result<Values, FlowError> {
        self.seen.lock().unwrap().push(inputs.clone());
        Ok(inputs)
    }
}
