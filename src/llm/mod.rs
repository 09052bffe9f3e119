//! LLM backend traits and implementations.
//!
//! This module provides vendor-agnostic abstractions for asking a Large
//! Language Model for one completion, supporting both the `OpenAI`-style
//! function-calling convention and the Anthropic-style tool-use convention.
//!
//! # Overview
//!
//! The [`LlmBackend`] trait turns a conversation plus a tool list into a
//! [`Completion`]: either final text or a batch of tool-call requests. The
//! [`Orchestrator`] builds on top of backends to run the tool loop.
//!
//! # Backends
//!
//! - [`ChatCompletionsBackend`]: `OpenAI`-compatible `/v1/chat/completions`
//!   (`OpenAI`, Ollama, Qwen, Groq, ...)
//! - [`MessagesBackend`]: Anthropic `/v1/messages`
//!
//! # Example
//!
//! ```rust,ignore
//! use mcp_chat::llm::{LlmProtocol, LlmSettings, Orchestrator, Provider};
//!
//! let settings = LlmSettings {
//!     base_url: "http://localhost:11434/v1".to_string(),
//!     api_key: None,
//!     model: "qwen2.5".to_string(),
//!     protocol: LlmProtocol::OpenAi,
//!     provider: Provider::Ollama,
//!     temperature: Some(0.2),
//!     max_tokens: 1000,
//! };
//! let orchestrator = Orchestrator::from_settings(settings);
//! ```

pub mod chat_completions;
pub mod messages;
pub mod normalize;
pub mod orchestrator;
pub mod provider;

pub use chat_completions::ChatCompletionsBackend;
pub use messages::MessagesBackend;
pub use orchestrator::{Orchestrator, ToolExecutionResult, ToolExecutor};
pub use provider::Provider;

use serde::{Deserialize, Serialize};

use crate::conversation::ConversationHistory;
use crate::mcp::registry::ToolDescriptor;

/// LLM connection and model settings.
///
/// Credentials live here and nowhere else; backends receive them at
/// construction time.
#[derive(Clone)]
pub struct LlmSettings {
    /// Base URL for the LLM API (e.g., `http://localhost:11434/v1`).
    pub base_url: String,
    /// Optional API key for authentication.
    pub api_key: Option<String>,
    /// Model identifier (e.g., `qwen2.5`, `claude-3-5-sonnet-20241022`).
    pub model: String,
    /// Tool-calling convention to speak.
    pub protocol: LlmProtocol,
    /// Provider type (detected from `base_url`).
    pub provider: Provider,
    /// Sampling temperature, omitted from requests when `None`.
    pub temperature: Option<f32>,
    /// Completion token limit (required by Anthropic, ignored elsewhere).
    pub max_tokens: u32,
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("protocol", &self.protocol)
            .field("provider", &self.provider)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Tool-calling convention variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProtocol {
    /// Pick the convention from the detected provider.
    #[default]
    Auto,
    /// `OpenAI`-style function calling (`/v1/chat/completions`).
    #[serde(alias = "chat")]
    OpenAi,
    /// Anthropic-style tool use (`/v1/messages`).
    #[serde(alias = "messages")]
    Anthropic,
}

impl LlmProtocol {
    /// Resolve `Auto` against a provider.
    #[must_use]
    pub fn resolve(self, provider: &Provider) -> Self {
        match self {
            Self::Auto if *provider == Provider::Anthropic => Self::Anthropic,
            Self::Auto => Self::OpenAi,
            other => other,
        }
    }
}

/// A message in a conversation, tagged by role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    /// System prompt.
    System {
        /// Prompt text.
        content: String,
    },
    /// User query.
    User {
        /// Query text.
        content: String,
    },
    /// Assistant reply: plain text, pending tool calls, or both.
    Assistant {
        /// Text content, `None` when the model only requested tools.
        content: Option<String>,
        /// Tool calls requested by this message.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    /// Tool result answering one assistant tool call.
    Tool {
        /// ID of the tool call this message answers.
        tool_call_id: String,
        /// Normalized result (or error) text.
        content: String,
    },
}

impl Message {
    /// Role name as it appears on the wire.
    #[must_use]
    pub fn role(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::Tool { .. } => "tool",
        }
    }

    /// Text content, if any.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::System { content } | Self::User { content } | Self::Tool { content, .. } => {
                Some(content)
            }
            Self::Assistant { content, .. } => content.as_deref(),
        }
    }
}

/// A tool call made by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this tool call, chosen by the backend.
    pub id: String,
    /// Type of tool (always "function" for now).
    #[serde(rename = "type")]
    pub call_type: String,
    /// Function details.
    pub function: ToolCallFunction,
}

impl ToolCall {
    /// Create a function tool call.
    #[must_use]
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: "function".to_string(),
            function: ToolCallFunction {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Function details in a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFunction {
    /// Function name (possibly namespaced by server).
    pub name: String,
    /// Arguments as JSON string.
    pub arguments: String,
}

/// One completion returned by a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// The model answered in natural language.
    Text(String),
    /// The model asked for one or more tools to run.
    ToolCalls {
        /// Text that accompanied the request, if any.
        content: Option<String>,
        /// Requested calls, in the order returned.
        calls: Vec<ToolCall>,
    },
}

/// Trait for LLM completion backends.
///
/// Implementations translate the conversation and tool list into their
/// vendor's wire format and translate the reply back into a [`Completion`].
#[async_trait::async_trait]
pub trait LlmBackend: Send + Sync {
    /// Request one completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the reply cannot be parsed.
    async fn complete(
        &self,
        history: &ConversationHistory,
        tools: &[ToolDescriptor],
    ) -> anyhow::Result<Completion>;
}

/// Build the backend matching the settings' protocol.
#[must_use]
pub fn backend_for(settings: LlmSettings) -> std::sync::Arc<dyn LlmBackend> {
    match settings.protocol.resolve(&settings.provider) {
        LlmProtocol::Anthropic => std::sync::Arc::new(MessagesBackend::new(settings)),
        LlmProtocol::OpenAi | LlmProtocol::Auto => {
            std::sync::Arc::new(ChatCompletionsBackend::new(settings))
        }
    }
}
