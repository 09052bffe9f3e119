//! MCP Chat
//!
//! An interactive chat client that lets an LLM call tools served by one or
//! more Model Context Protocol servers.
//!
//! # Architecture
//!
//! - **LLM Orchestration**: one tool loop over `OpenAI`-style and
//!   Anthropic-style backends
//! - **MCP Client**: stdio, SSE and streamable HTTP sessions with tool
//!   discovery and routing
//! - **Shell**: line-oriented query loop with interrupt handling
//!
//! # Modules
//!
//! - [`llm`]: LLM backend traits, implementations and the orchestrator
//! - [`mcp`]: MCP server configuration, sessions and the tool registry
//! - [`conversation`]: Conversation history
//! - [`client`]: Chat client wiring sessions to the orchestrator
//! - [`shell`]: Interactive query loop
//! - [`config`]: Layered application configuration

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]

pub mod client;
pub mod config;
pub mod conversation;
pub mod llm;
pub mod mcp;
pub mod shell;

pub use client::ChatClient;
