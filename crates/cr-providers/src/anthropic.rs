//! Anthropic Messages API backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use cr_core::{
    CompletionRequest, CompletionResponse, Error, FinishReason, Message, Provider, Role, ToolCall,
    ToolChoice, ToolDefinition, Usage,
};

use crate::wire;

const API_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
/// The Messages API rejects requests without `max_tokens`.
const MAX_TOKENS: u32 = 8192;

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: Option<String>,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: wire::client(),
            api_key: api_key.into(),
            base_url: API_URL.to_string(),
            default_model: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, Error> {
        let body = MessagesRequest::from_completion(&request, self.default_model.as_deref());
        debug!(
            model = ?body.model,
            turns = body.messages.len(),
            forced_tool = ?body.tool_choice,
            "Anthropic request"
        );

        let builder = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION);
        let reply: MessagesResponse = wire::post_json("anthropic", builder, &body).await?;
        let response = reply.into_completion();

        debug!(
            model = %response.model,
            finish_reason = ?response.finish_reason,
            tool_calls = response.message.tool_calls.len(),
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            "Anthropic response"
        );
        Ok(response)
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Turn>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Choice>,
}

#[derive(Debug, Serialize)]
struct Turn {
    role: &'static str,
    content: Vec<Block>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Debug, Serialize)]
struct ToolSpec {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Choice {
    Auto,
    Any,
    Tool { name: String },
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: String,
    content: Vec<Block>,
    stop_reason: Option<String>,
    usage: TokenCounts,
}

#[derive(Debug, Deserialize)]
struct TokenCounts {
    input_tokens: u32,
    output_tokens: u32,
}

/// Blocks for one message, plus the role it is sent under. Tool results
/// travel as user turns.
fn blocks(message: &Message) -> (&'static str, Vec<Block>) {
    let text = (!message.content.is_empty()).then(|| Block::Text {
        text: message.content.clone(),
    });
    match message.role {
        Role::Tool => (
            "user",
            vec![Block::ToolResult {
                tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                content: message.content.clone(),
            }],
        ),
        Role::Assistant => {
            let calls = message.tool_calls.iter().map(|call| Block::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.arguments.clone(),
            });
            ("assistant", text.into_iter().chain(calls).collect())
        }
        Role::User | Role::System => ("user", text.into_iter().collect()),
    }
}

impl From<&ToolDefinition> for ToolSpec {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: serde_json::to_value(&tool.parameters).unwrap_or_default(),
        }
    }
}

impl From<&ToolChoice> for Choice {
    fn from(choice: &ToolChoice) -> Self {
        match choice {
            ToolChoice::Auto => Choice::Auto,
            ToolChoice::Required => Choice::Any,
            ToolChoice::Tool(name) => Choice::Tool { name: name.clone() },
        }
    }
}

impl MessagesRequest {
    fn from_completion(request: &CompletionRequest, default_model: Option<&str>) -> Self {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System && !m.content.is_empty())
            .map(|m| m.content.as_str())
            .collect();

        // Roles must alternate, so consecutive same-role turns are folded.
        let mut messages: Vec<Turn> = Vec::new();
        for message in request.messages.iter().filter(|m| m.role != Role::System) {
            let (role, content) = blocks(message);
            match messages.last_mut() {
                Some(last) if last.role == role => last.content.extend(content),
                _ => messages.push(Turn { role, content }),
            }
        }

        Self {
            model: request
                .model
                .clone()
                .or_else(|| default_model.map(str::to_string)),
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages,
            max_tokens: request.max_tokens.unwrap_or(MAX_TOKENS),
            temperature: request.temperature,
            tools: request.tools.iter().map(ToolSpec::from).collect(),
            tool_choice: request.tool_choice.as_ref().map(Choice::from),
        }
    }
}

impl MessagesResponse {
    fn into_completion(self) -> CompletionResponse {
        let mut text: Vec<String> = Vec::new();
        let mut calls = Vec::new();
        for block in self.content {
            match block {
                Block::Text { text: t } => text.push(t),
                Block::ToolUse { id, name, input } => calls.push(ToolCall::new(id, name, input)),
                Block::ToolResult { .. } => {}
            }
        }
        let text = text.join("\n");

        let finish_reason = match self.stop_reason.as_deref() {
            Some("max_tokens") => FinishReason::Length,
            Some("tool_use") => FinishReason::ToolCalls,
            _ => FinishReason::Stop,
        };

        CompletionResponse {
            message: if calls.is_empty() {
                Message::assistant(text)
            } else {
                Message::assistant_with_tool_calls(text, calls)
            },
            usage: Usage::new(self.usage.input_tokens, self.usage.output_tokens),
            model: self.model,
            finish_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn wire(request: &CompletionRequest) -> Value {
        serde_json::to_value(MessagesRequest::from_completion(request, None)).unwrap()
    }

    #[test]
    fn test_forced_tool_request() {
        let request = CompletionRequest::new(vec![
            Message::system("You are a corporate information search assistant."),
            Message::user("Acme Corp headquarters"),
        ])
        .with_model("claude-3-5-sonnet-20240620")
        .with_temperature(0.0)
        .with_forced_tool(ToolDefinition::new("SearchTool", "Break the query into steps"));

        let body = wire(&request);
        assert_eq!(body["system"], "You are a corporate information search assistant.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["max_tokens"], MAX_TOKENS);
        assert_eq!(body["tool_choice"], json!({"type": "tool", "name": "SearchTool"}));
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn test_plain_request_omits_tools() {
        let body = wire(&CompletionRequest::new(vec![Message::user("Arima Kinen 2024")]));
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert!(body.get("system").is_none());
    }

    #[test]
    fn test_question_and_instruction_fold_into_one_turn() {
        let body = wire(&CompletionRequest::new(vec![
            Message::user("Acme Corp headquarters"),
            Message::user("Extract the company information."),
        ]));
        let turns = body["messages"].as_array().unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0]["content"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_tool_result_is_sent_as_user_turn() {
        let call = ToolCall::new("toolu_1", "tavily_search_results_json", json!({"query": "Acme"}));
        let body = wire(&CompletionRequest::new(vec![
            Message::user("Acme Corp headquarters"),
            Message::assistant_with_tool_calls("", vec![call]),
            Message::tool_result("toolu_1", "{\"results\": []}"),
        ]));

        let turns = body["messages"].as_array().unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1]["content"][0]["type"], "tool_use");
        assert_eq!(turns[2]["role"], "user");
        assert_eq!(turns[2]["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn test_tool_use_reply() {
        let reply: MessagesResponse = serde_json::from_value(json!({
            "model": "claude-3-5-sonnet-20240620",
            "content": [
                {"type": "text", "text": "Planning."},
                {"type": "tool_use", "id": "toolu_1", "name": "SearchTool", "input": {"steps": []}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 20}
        }))
        .unwrap();

        let response = reply.into_completion();
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        assert_eq!(response.message.content, "Planning.");
        assert_eq!(response.message.tool_calls[0].name, "SearchTool");
        assert_eq!(response.usage.total_tokens, 30);
    }

    #[test]
    fn test_provider_identity() {
        let provider = AnthropicProvider::new("sk-ant-test").with_default_model("claude-3-5-sonnet-20240620");
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.default_model(), Some("claude-3-5-sonnet-20240620"));
    }
}
