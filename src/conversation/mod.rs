//! Conversation history management.
//!
//! A [`ConversationHistory`] is owned by whoever drives the chat loop and is
//! handed to the orchestrator by mutable reference for each turn. It is
//! append-only: entries are never replaced or reordered.
//!
//! # Example
//!
//! ```rust
//! use mcp_chat::conversation::ConversationHistory;
//!
//! let mut history = ConversationHistory::new();
//! history.push_user("查询北京的天气");
//! assert_eq!(history.len(), 1);
//! ```

mod history;

pub use history::ConversationHistory;
