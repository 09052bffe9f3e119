//! Anthropic Messages API backend.
//!
//! This module implements the [`LlmBackend`] trait for the Anthropic
//! Messages API (`/v1/messages`). The conversation is kept in the
//! `OpenAI`-style shape and translated on the way out:
//!
//! - assistant tool calls become `tool_use` content blocks
//! - consecutive tool messages become one `user` message of `tool_result`
//!   blocks
//! - the system prompt moves to the top-level `system` field

use serde_json::{Map, Value, json};

use crate::conversation::ConversationHistory;
use crate::mcp::registry::ToolDescriptor;

use super::{Completion, LlmBackend, LlmSettings, Message, ToolCall};

/// Anthropic API version header value.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Backend for the Anthropic Messages API.
#[derive(Clone)]
pub struct MessagesBackend {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for MessagesBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagesBackend")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl MessagesBackend {
    /// Create a new Messages backend with the given settings.
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
            "max_tokens": self.settings.max_tokens,
            "messages": translate_messages(history.messages()),
        });

        if let Some(system) = history.system_prompt() {
            body["system"] = json!(system);
        }
        if !tools.is_empty() {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.input_schema,
                        })
                    })
                    .collect(),
            );
        }
        if let Some(t) = self.settings.temperature {
            body["temperature"] = json!(t);
        }

        body
    }
}

/// Translate history into Anthropic message objects.
fn translate_messages(messages: &[Message]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(messages.len());
    let mut pending_results: Vec<Value> = Vec::new();

    for msg in messages {
        if let Message::Tool {
            tool_call_id,
            content,
        } = msg
        {
            pending_results.push(json!({
                "type": "tool_result",
                "tool_use_id": tool_call_id,
                "content": content,
            }));
            continue;
        }

        if !pending_results.is_empty() {
            out.push(json!({"role": "user", "content": std::mem::take(&mut pending_results)}));
        }

        match msg {
            // system prompt travels in the top-level field
            Message::System { .. } | Message::Tool { .. } => {}
            Message::User { content } => out.push(json!({"role": "user", "content": content})),
            Message::Assistant {
                content,
                tool_calls,
            } => {
                let mut blocks = Vec::new();
                if let Some(text) = content.as_deref().filter(|t| !t.is_empty()) {
                    blocks.push(json!({"type": "text", "text": text}));
                }
                for call in tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.function.name,
                        "input": tool_input(&call.function.arguments),
                    }));
                }
                // the API rejects empty assistant turns
                if !blocks.is_empty() {
                    out.push(json!({"role": "assistant", "content": blocks}));
                }
            }
        }
    }

    if !pending_results.is_empty() {
        out.push(json!({"role": "user", "content": pending_results}));
    }

    out
}

fn tool_input(arguments: &str) -> Value {
    match serde_json::from_str::<Value>(arguments) {
        Ok(v @ Value::Object(_)) => v,
        _ => Value::Object(Map::new()),
    }
}

#[async_trait::async_trait]
impl LlmBackend for MessagesBackend {
    async fn complete(
        &self,
        history: &ConversationHistory,
        tools: &[ToolDescriptor],
    ) -> anyhow::Result<Completion> {
        let url = self
            .settings
            .provider
            .build_messages_url(&self.settings.base_url);
        let body = self.request_body(history, tools);

        tracing::debug!(
            url = %url,
            model = %self.settings.model,
            message_count = history.len(),
            tool_count = tools.len(),
            "Sending messages request"
        );

        let mut rb = self
            .http
            .post(&url)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        if let Some(k) = &self.settings.api_key {
            rb = rb.header("x-api-key", k);
        }

        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("messages request failed ({status}): {text}");
        }

        let v: Value = resp.json().await?;
        parse_completion(&v)
    }
}

/// Parse a Messages API response.
fn parse_completion(v: &Value) -> anyhow::Result<Completion> {
    let blocks = v
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow::anyhow!("messages response has no content array"))?;

    let mut text = String::new();
    let mut calls = Vec::new();

    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(Value::as_str) {
                    text.push_str(t);
                }
            }
            Some("tool_use") => {
                let id = block.get("id").and_then(Value::as_str).unwrap_or_default();
                let name = block.get("name").and_then(Value::as_str).unwrap_or_default();
                let input = block.get("input").cloned().unwrap_or_else(|| json!({}));
                calls.push(ToolCall::function(id, name, input.to_string()));
            }
            _ => {}
        }
    }

    let stop_reason = v.get("stop_reason").and_then(Value::as_str);
    if stop_reason == Some("tool_use") || !calls.is_empty() {
        if calls.is_empty() {
            anyhow::bail!("messages response stopped for tool_use but carried no tool_use block");
        }
        let content = (!text.is_empty()).then_some(text);
        return Ok(Completion::ToolCalls { content, calls });
    }

    Ok(Completion::Text(text))
}
