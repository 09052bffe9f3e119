//! LLM orchestrator with tool loop execution.
//!
//! The orchestrator runs one conversational turn:
//! 1. Append the user query to the history
//! 2. Ask the backend for a completion
//! 3. Execute any requested tool calls through a [`ToolExecutor`]
//! 4. Feed the results back and ask again
//! 5. Repeat until the model produces a plain answer
//!
//! A failing tool never aborts the turn; its error text is fed back to the
//! model as the tool result.
//!
//! # Example
//!
//! ```rust,ignore
//! use mcp_chat::conversation::ConversationHistory;
//! use mcp_chat::llm::Orchestrator;
//!
//! let orchestrator = Orchestrator::from_settings(settings);
//! let mut history = ConversationHistory::new();
//! let answer = orchestrator
//!     .run_turn("查询北京的天气", &mut history, registry.descriptors(), &executor)
//!     .await?;
//! ```

use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::conversation::ConversationHistory;
use crate::mcp::registry::ToolDescriptor;

use super::{Completion, LlmBackend, LlmSettings, ToolCall, backend_for, normalize::normalize};

/// Default cap on tool-call rounds per turn.
pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 10;

/// Outcome of executing one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolExecutionResult {
    /// The tool ran. `tool_name` is the name the owning server knows it by.
    Success { tool_name: String, content: String },
    /// The tool could not be resolved or failed.
    Failure { message: String },
}

impl ToolExecutionResult {
    pub fn success(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Success {
            tool_name: tool_name.into(),
            content: content.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }
}

/// Executes tool calls on behalf of the orchestrator.
///
/// Implementations must not panic on unknown tools; they report a
/// [`ToolExecutionResult::Failure`] instead.
#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tool_name: &str, arguments: Map<String, Value>) -> ToolExecutionResult;
}

/// LLM orchestrator with tool loop execution.
#[derive(Clone)]
pub struct Orchestrator {
    backend: Arc<dyn LlmBackend>,
    max_tool_iterations: Option<usize>,
}

#[allow(clippy::missing_fields_in_debug)]
impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("max_tool_iterations", &self.max_tool_iterations)
            .finish()
    }
}

impl Orchestrator {
    /// Create an orchestrator over an existing backend.
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self {
            backend,
            max_tool_iterations: Some(DEFAULT_MAX_TOOL_ITERATIONS),
        }
    }

    /// Create an orchestrator with the backend matching `settings.protocol`.
    pub fn from_settings(settings: LlmSettings) -> Self {
        Self::new(backend_for(settings))
    }

    /// Cap tool-call rounds per turn; `None` means no cap.
    #[must_use]
    pub fn with_max_tool_iterations(mut self, max: Option<usize>) -> Self {
        self.max_tool_iterations = max;
        self
    }

    /// Run one turn and return the accumulated output.
    ///
    /// The output is the newline-joined sequence of trace lines, tool error
    /// lines, and assistant text, in the order produced.
    ///
    /// # Errors
    ///
    /// Returns an error only when the backend fails; tool failures are fed
    /// back to the model.
    pub async fn run_turn(
        &self,
        query: &str,
        history: &mut ConversationHistory,
        tools: &[ToolDescriptor],
        executor: &dyn ToolExecutor,
    ) -> anyhow::Result<String> {
        let request_id = Uuid::new_v4().to_string();

        tracing::info!(
            request_id = %request_id,
            message_count = history.len(),
            tool_count = tools.len(),
            "Starting turn"
        );

        history.push_user(query);

        let mut output: Vec<String> = Vec::new();
        let mut rounds = 0usize;
        let mut completion = self.backend.complete(history, tools).await?;

        loop {
            let (content, calls) = match completion {
                Completion::Text(text) => {
                    tracing::info!(
                        request_id = %request_id,
                        rounds,
                        answer_length = text.len(),
                        "Turn complete"
                    );
                    if !text.is_empty() {
                        output.push(text.clone());
                    }
                    history.push_assistant_text(text);
                    break;
                }
                Completion::ToolCalls { content, calls } => (content, calls),
            };

            if let Some(max) = self.max_tool_iterations
                && rounds >= max
            {
                tracing::warn!(
                    request_id = %request_id,
                    max_iterations = max,
                    "Maximum tool loop iterations exceeded"
                );
                output.push(format!(
                    "[Stopped after {max} tool-call rounds without a final answer]"
                ));
                break;
            }
            rounds += 1;

            tracing::info!(
                request_id = %request_id,
                iteration = rounds,
                tool_call_count = calls.len(),
                "Model requested tool calls"
            );

            if let Some(text) = content.as_deref().filter(|t| !t.trim().is_empty()) {
                output.push(text.to_string());
            }
            history.push_assistant_tool_calls(content, calls.clone());

            for call in &calls {
                let (lines, result_text) = self.execute_call(&request_id, call, executor).await;
                history.push_tool_result(call.id.clone(), result_text);
                output.extend(lines);
            }

            completion = self.backend.complete(history, tools).await?;
        }

        Ok(output.join("\n"))
    }

    /// Execute one call; returns the output lines and the tool message text.
    async fn execute_call(
        &self,
        request_id: &str,
        call: &ToolCall,
        executor: &dyn ToolExecutor,
    ) -> (Vec<String>, String) {
        let requested = call.function.name.as_str();

        let (result, rendered_args) = match parse_arguments(&call.function.arguments) {
            Ok(args) => {
                let rendered = render_arguments(&Value::Object(args.clone()));
                (executor.execute(requested, args).await, rendered)
            }
            Err(message) => (
                ToolExecutionResult::failure(message),
                call.function.arguments.clone(),
            ),
        };

        match result {
            ToolExecutionResult::Success { tool_name, content } => {
                tracing::info!(
                    request_id = %request_id,
                    tool_id = %call.id,
                    tool_name = %tool_name,
                    result_length = content.len(),
                    "Tool call succeeded"
                );
                let text = normalize(&tool_name, &content);
                (
                    vec![format!("[Calling tool {tool_name} with args {rendered_args}]")],
                    text,
                )
            }
            ToolExecutionResult::Failure { message } => {
                tracing::error!(
                    request_id = %request_id,
                    tool_id = %call.id,
                    tool_name = %requested,
                    error = %message,
                    "Tool call failed"
                );
                let text = format!("Error: {message}");
                (
                    vec![
                        format!("[Calling tool {requested} with args {rendered_args}]"),
                        text.clone(),
                    ],
                    text,
                )
            }
        }
    }
}

/// Decode a tool-call argument payload into a JSON object.
fn parse_arguments(raw: &str) -> Result<Map<String, Value>, String> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("tool arguments must be a JSON object, got {other}")),
        Err(e) => Err(format!("invalid tool arguments: {e}")),
    }
}

/// Render a JSON value as a Python literal, e.g. `{'city': '北京'}`.
pub fn render_arguments(value: &Value) -> String {
    let mut out = String::new();
    write_literal(value, &mut out);
    out
}

fn write_literal(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("None"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_str_literal(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_literal(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (k, v)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_str_literal(k, out);
                out.push_str(": ");
                write_literal(v, out);
            }
            out.push('}');
        }
    }
}

// Single quotes unless the text has a single quote and no double quote.
fn write_str_literal(s: &str, out: &mut String) {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => out.push_str(&format!("\\x{:02x}", u32::from(c))),
            c => out.push(c),
        }
    }
    out.push(quote);
}
