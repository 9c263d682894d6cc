//! Test utilities shared across the workspace.
//! Only compiled when running tests or with the `testing` feature.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Error;
use crate::message::{Message, ToolCall, Usage};
use crate::provider::{
    CompletionRequest, CompletionResponse, FinishReason, ModelHandle, ModelSelector, Provider,
};
use crate::tool::{PropertySchema, Tool, ToolDefinition, ToolOutput, ToolParameters};

/// A mock provider that returns pre-configured responses.
pub struct MockProvider {
    responses: Mutex<Vec<Result<CompletionResponse, Error>>>,
    /// Captured requests (for assertion).
    pub captured_requests: Mutex<Vec<CompletionRequest>>,
    pub name: String,
    pub default_model: Option<String>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            captured_requests: Mutex::new(Vec::new()),
            name: "mock".to_string(),
            default_model: None,
        }
    }

    fn queue(&self, response: Result<CompletionResponse, Error>) {
        self.responses.lock().unwrap().insert(0, response);
    }

    /// Queue a plain text response to be returned by the next complete() call.
    /// Responses are returned in FIFO order (first queued = first returned).
    pub fn queue_response(&self, content: &str) {
        self.queue_raw_response(CompletionResponse {
            message: Message::assistant(content),
            usage: Usage::new(0, 0),
            model: "mock-model".to_string(),
            finish_reason: FinishReason::Stop,
        });
    }

    /// Queue a response carrying a single tool call.
    pub fn queue_tool_call(&self, name: &str, arguments: Value) {
        let call_index = self.responses.lock().unwrap().len();
        self.queue_raw_response(CompletionResponse {
            message: Message::assistant_with_tool_calls(
                "",
                vec![ToolCall::new(format!("call_{call_index}"), name, arguments)],
            ),
            usage: Usage::new(0, 0),
            model: "mock-model".to_string(),
            finish_reason: FinishReason::ToolCalls,
        });
    }

    /// Queue a raw CompletionResponse.
    pub fn queue_raw_response(&self, response: CompletionResponse) {
        self.queue(Ok(response));
    }

    /// Queue an error for the next complete() call.
    pub fn queue_error(&self, error: Error) {
        self.queue(Err(error));
    }

    /// Get the number of captured requests.
    pub fn request_count(&self) -> usize {
        self.captured_requests.lock().unwrap().len()
    }

    /// Get the last captured request.
    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.captured_requests.lock().unwrap().last().cloned()
    }

    /// Number of responses still queued.
    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, Error> {
        self.captured_requests.lock().unwrap().push(request);
        match self.responses.lock().unwrap().pop() {
            Some(response) => response,
            None => Err(Error::Unknown("No mock response queued".to_string())),
        }
    }
}

/// A mock tool returning queued outputs and recording the arguments it saw.
pub struct MockTool {
    name: String,
    outputs: Mutex<Vec<Result<String, Error>>>,
    pub calls: Mutex<Vec<Value>>,
}

impl MockTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outputs: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue the content of the next execute() call (FIFO).
    pub fn queue_output(&self, content: impl Into<String>) {
        self.outputs.lock().unwrap().insert(0, Ok(content.into()));
    }

    pub fn queue_error(&self, error: Error) {
        self.outputs.lock().unwrap().insert(0, Err(error));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Mock tool"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new().add_property("query", PropertySchema::string("Query"), true),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, Error> {
        self.calls.lock().unwrap().push(arguments);
        match self.outputs.lock().unwrap().pop() {
            Some(Ok(content)) => Ok(ToolOutput::success(content)),
            Some(Err(err)) => Err(err),
            None => Err(Error::tool(self.name.clone(), "No mock output queued")),
        }
    }
}

/// A selector over a fixed set of handles.
#[derive(Default)]
pub struct FixedSelector {
    handles: HashMap<String, ModelHandle>,
}

impl FixedSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, model_id: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.handles
            .insert(model_id.into(), ModelHandle::new(provider, "mock-model"));
        self
    }
}

impl ModelSelector for FixedSelector {
    fn select(&self, model_id: &str) -> Result<ModelHandle, Error> {
        self.handles
            .get(model_id)
            .cloned()
            .ok_or_else(|| Error::config(format!("Invalid model specified: {model_id}")))
    }
}
