//! Typed structured generation on top of forced tool calls.
//!
//! Every backend we support can be told "you must call tool X". The tool's
//! parameter schema is the output schema, and the call arguments are the
//! structured value.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::Error;
use crate::message::Message;
use crate::provider::ModelHandle;
use crate::tool::ToolDefinition;

/// A value that can be produced by forcing a tool call.
pub trait StructuredOutput: DeserializeOwned {
    /// Turn raw tool-call arguments into `Self`.
    ///
    /// The default treats any mismatch as a schema violation. Types with
    /// their own coercion rules override this to report finer errors.
    fn from_arguments(arguments: Value) -> Result<Self, Error> {
        serde_json::from_value(arguments).map_err(|e| Error::schema_violation(e.to_string()))
    }
}

impl StructuredOutput for Value {}

/// Force a call to `definition` and return its arguments, if the model made one.
pub async fn generate_tool_call(
    model: &ModelHandle,
    messages: Vec<Message>,
    definition: ToolDefinition,
) -> Result<Option<Value>, Error> {
    let tool_name = definition.name.clone();
    let request = model.request(messages).with_forced_tool(definition);
    let response = model.complete(request).await?;

    debug!(
        tool = %tool_name,
        model = %response.model,
        tool_calls = response.message.tool_calls.len(),
        prompt_tokens = response.usage.prompt_tokens,
        completion_tokens = response.usage.completion_tokens,
        "Structured generation response"
    );

    Ok(response
        .message
        .tool_calls
        .into_iter()
        .find(|call| call.name == tool_name)
        .map(|call| call.arguments))
}

/// Force a call to `definition` and coerce the arguments into `T`.
///
/// Fails with [`Error::SchemaViolation`] when the model does not call the
/// tool at all.
pub async fn generate_structured<T: StructuredOutput>(
    model: &ModelHandle,
    messages: Vec<Message>,
    definition: ToolDefinition,
) -> Result<T, Error> {
    let tool_name = definition.name.clone();
    let arguments = generate_tool_call(model, messages, definition)
        .await?
        .ok_or_else(|| Error::schema_violation(format!("model did not call {tool_name}")))?;
    T::from_arguments(arguments)
}
