//! `OpenAI` Chat Completions API backend.
//!
//! This module implements the [`LlmBackend`] trait for the `OpenAI` Chat
//! Completions API (`/v1/chat/completions`) and its compatible servers
//! (Ollama, Qwen, Groq, `OpenRouter`, Azure).

use serde_json::{Value, json};

use crate::conversation::ConversationHistory;
use crate::mcp::registry::ToolDescriptor;

use super::{Completion, LlmBackend, LlmSettings, ToolCall};

/// Backend for the `OpenAI` Chat Completions API.
#[derive(Clone)]
pub struct ChatCompletionsBackend {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for ChatCompletionsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsBackend")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ChatCompletionsBackend {
    /// Create a new Chat Completions backend with the given settings.
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    fn request_body(&self, history: &ConversationHistory, tools: &[ToolDescriptor]) -> Value {
        let mut body = json!({
            "model": self.settings.model,
            "messages": history.messages_with_system(),
        });

        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(function_tool).collect());
            body["tool_choice"] = json!("auto");
        }
        if let Some(t) = self.settings.temperature {
            body["temperature"] = json!(t);
        }

        body
    }
}

/// Convert a descriptor to the `{"type": "function", ...}` wire shape.
fn function_tool(tool: &ToolDescriptor) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        }
    })
}

#[async_trait::async_trait]
impl LlmBackend for ChatCompletionsBackend {
    async fn complete(
        &self,
        history: &ConversationHistory,
        tools: &[ToolDescriptor],
    ) -> anyhow::Result<Completion> {
        let url = self.settings.provider.build_chat_url(&self.settings.base_url);
        let body = self.request_body(history, tools);

        tracing::debug!(
            url = %url,
            model = %self.settings.model,
            message_count = history.len() + usize::from(history.system_prompt().is_some()),
            tool_count = tools.len(),
            "Sending chat completion request"
        );

        let mut rb = self.http.post(&url).json(&body);
        if let Some(k) = &self.settings.api_key {
            rb = if self.settings.provider.uses_api_key_header() {
                rb.header("api-key", k)
            } else {
                rb.bearer_auth(k)
            };
        }

        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("chat completion request failed ({status}): {text}");
        }

        let v: Value = resp.json().await?;
        parse_completion(&v)
    }
}

/// Parse a non-streaming chat completion response.
fn parse_completion(v: &Value) -> anyhow::Result<Completion> {
    let choice = v
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| anyhow::anyhow!("chat completion response has no choices"))?;
    let message = &choice["message"];

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .map(ToString::to_string);

    let calls: Vec<ToolCall> = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(parse_tool_call).collect())
        .unwrap_or_default();

    let finish_reason = choice.get("finish_reason").and_then(Value::as_str);

    if !calls.is_empty() {
        return Ok(Completion::ToolCalls { content, calls });
    }
    if finish_reason == Some("tool_calls") {
        anyhow::bail!("chat completion finished with tool_calls but carried none");
    }

    Ok(Completion::Text(content.unwrap_or_default()))
}

fn parse_tool_call(tc: &Value) -> Option<ToolCall> {
    let id = tc.get("id").and_then(Value::as_str)?;
    let function = tc.get("function")?;
    let name = function.get("name").and_then(Value::as_str)?;
    // Some servers send arguments as an object rather than a JSON string
    let arguments = match function.get("arguments") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    Some(ToolCall::function(id, name, arguments))
}
