//! Chat client tying the orchestrator to live MCP sessions.

use serde_json::{Map, Value};

use crate::conversation::ConversationHistory;
use crate::llm::{Orchestrator, ToolExecutionResult, ToolExecutor};
use crate::mcp::registry::{RequiredPolicy, ToolRegistry};
use crate::mcp::session::SessionManager;
use crate::shell::QueryHandler;

/// Routes advertised tool names to the owning session.
#[derive(Debug)]
pub struct RoutingExecutor<'a> {
    registry: &'a ToolRegistry,
    sessions: &'a SessionManager,
}

impl<'a> RoutingExecutor<'a> {
    pub fn new(registry: &'a ToolRegistry, sessions: &'a SessionManager) -> Self {
        Self { registry, sessions }
    }
}

#[async_trait::async_trait]
impl ToolExecutor for RoutingExecutor<'_> {
    async fn execute(&self, tool_name: &str, arguments: Map<String, Value>) -> ToolExecutionResult {
        let Some(descriptor) = self.registry.resolve(tool_name) else {
            return ToolExecutionResult::failure(format!("unknown tool: {tool_name}"));
        };

        match self
            .sessions
            .execute(&descriptor.server_id, &descriptor.remote_name, arguments)
            .await
        {
            Ok(content) => ToolExecutionResult::success(descriptor.remote_name.clone(), content),
            Err(e) => ToolExecutionResult::failure(e.to_string()),
        }
    }
}

/// One interactive chat session over a set of MCP servers.
#[derive(Debug)]
pub struct ChatClient {
    orchestrator: Orchestrator,
    sessions: SessionManager,
    history: ConversationHistory,
    policy: RequiredPolicy,
}

impl ChatClient {
    pub fn new(orchestrator: Orchestrator, sessions: SessionManager, policy: RequiredPolicy) -> Self {
        Self {
            orchestrator,
            sessions,
            history: ConversationHistory::new(),
            policy,
        }
    }

    /// Start from an existing history, e.g. one carrying a system prompt.
    #[must_use]
    pub fn with_history(mut self, history: ConversationHistory) -> Self {
        self.history = history;
        self
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Run one query against the current tool listings.
    ///
    /// # Errors
    ///
    /// Fails when the LLM backend fails. A server whose listing fails
    /// contributes no tools for this query.
    pub async fn process_query(&mut self, query: &str) -> anyhow::Result<String> {
        let listings = self.sessions.list_tools().await;
        let registry = ToolRegistry::build(listings, self.policy);
        let executor = RoutingExecutor::new(&registry, &self.sessions);

        self.orchestrator
            .run_turn(query, &mut self.history, registry.descriptors(), &executor)
            .await
    }

    /// Close every MCP session.
    pub async fn shutdown(mut self) {
        self.sessions.close_all().await;
    }
}

#[async_trait::async_trait]
impl QueryHandler for ChatClient {
    async fn handle(&mut self, query: &str) -> anyhow::Result<String> {
        self.process_query(query).await
    }
}
