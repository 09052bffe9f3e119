//! Append-only conversation history.

use std::collections::HashSet;

use crate::llm::{Message, ToolCall};

/// Ordered message history for one interactive session.
///
/// The optional system prompt is not a history entry; it is prepended by
/// [`ConversationHistory::messages_with_system`] when talking to backends
/// that take it inline.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    messages: Vec<Message>,
    system_prompt: Option<String>,
}

impl ConversationHistory {
    /// Create an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty history with a system prompt.
    #[must_use]
    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            system_prompt: Some(prompt.into()),
        }
    }

    /// Get the system prompt if set.
    #[must_use]
    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Add a user message.
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::User {
            content: content.into(),
        });
    }

    /// Add a plain-text assistant message.
    pub fn push_assistant_text(&mut self, content: impl Into<String>) {
        self.messages.push(Message::Assistant {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        });
    }

    /// Add an assistant message recording pending tool calls.
    pub fn push_assistant_tool_calls(&mut self, content: Option<String>, tool_calls: Vec<ToolCall>) {
        self.messages.push(Message::Assistant {
            content: content.filter(|c| !c.is_empty()),
            tool_calls,
        });
    }

    /// Add a tool result answering `tool_call_id`.
    ///
    /// The matching assistant tool call must already be in the history.
    pub fn push_tool_result(&mut self, tool_call_id: impl Into<String>, content: impl Into<String>) {
        let tool_call_id = tool_call_id.into();
        debug_assert!(
            self.requested_call_ids().contains(tool_call_id.as_str()),
            "tool result {tool_call_id} has no preceding assistant tool call"
        );
        self.messages.push(Message::Tool {
            tool_call_id,
            content: content.into(),
        });
    }

    /// All history entries, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// History entries with the system prompt (if any) prepended.
    #[must_use]
    pub fn messages_with_system(&self) -> Vec<Message> {
        let mut result = Vec::with_capacity(self.messages.len() + 1);

        if let Some(prompt) = &self.system_prompt {
            result.push(Message::System {
                content: prompt.clone(),
            });
        }

        result.extend(self.messages.iter().cloned());
        result
    }

    /// Get the number of messages in the conversation.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if the conversation has no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Tool messages whose call id was not requested by an earlier
    /// assistant message.
    #[must_use]
    pub fn orphaned_tool_results(&self) -> Vec<&Message> {
        let mut requested = HashSet::new();
        let mut orphans = Vec::new();

        for message in &self.messages {
            match message {
                Message::Assistant { tool_calls, .. } => {
                    requested.extend(tool_calls.iter().map(|tc| tc.id.as_str()));
                }
                Message::Tool { tool_call_id, .. } if !requested.contains(tool_call_id.as_str()) => {
                    orphans.push(message);
                }
                _ => {}
            }
        }

        orphans
    }

    fn requested_call_ids(&self) -> HashSet<&str> {
        self.messages
            .iter()
            .filter_map(|m| match m {
                Message::Assistant { tool_calls, .. } => Some(tool_calls),
                _ => None,
            })
            .flatten()
            .map(|tc| tc.id.as_str())
            .collect()
    }
}
