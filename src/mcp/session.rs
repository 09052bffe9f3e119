//! MCP client sessions.
//!
//! [`McpSession`] wraps an rmcp client over stdio, SSE or streamable HTTP.
//! [`SessionManager`] owns the live sessions keyed by server identifier and
//! routes listings and calls to them. Opening a session goes through a
//! [`SessionConnector`] so startup can be driven without real servers.

use async_trait::async_trait;
use rmcp::{
    model::CallToolRequestParam,
    service::{RoleClient, RunningService, ServiceExt},
    transport::{
        ConfigureCommandExt, SseClientTransport, StreamableHttpClientTransport, TokioChildProcess,
    },
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tokio::process::Command;
use url::Url;

use crate::mcp::config::{ServerConfig, ServerMode, expand_env_map, expand_env_placeholders};
use crate::mcp::error::McpError;
use crate::mcp::types::McpTool;

type ClientService = RunningService<RoleClient, ()>;

/// One live tool-serving session.
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// List the tools the server currently advertises.
    async fn list_tools(&self) -> Result<Vec<McpTool>, McpError>;

    /// Call a tool and return its text payload.
    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<String, McpError>;

    /// Release the transport.
    async fn close(self: Box<Self>);
}

/// rmcp-backed session over any supported transport.
pub struct McpSession {
    server_id: String,
    service: ClientService,
}

impl std::fmt::Debug for McpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpSession")
            .field("server_id", &self.server_id)
            .finish_non_exhaustive()
    }
}

impl McpSession {
    /// Open the transport described by `config` and run the initialize
    /// handshake.
    pub async fn connect(server_id: &str, config: &ServerConfig) -> Result<Self, McpError> {
        let connect_err = |message: String| McpError::Connect {
            server: server_id.to_string(),
            message,
        };

        let service = match config {
            ServerConfig::Stdio { command, args, env } => {
                let env = expand_env_map(env);
                let transport = TokioChildProcess::new(Command::new(command).configure(|cmd| {
                    cmd.args(args);
                    cmd.envs(&env);
                }))
                .map_err(|e| connect_err(format!("spawn '{command}': {e}")))?;

                ().serve(transport)
                    .await
                    .map_err(|e| connect_err(format!("initialize stdio client: {e}")))?
            }

            ServerConfig::Sse { url } => {
                let url = parse_url(server_id, url)?;
                let transport = SseClientTransport::start(url.to_string())
                    .await
                    .map_err(|e| connect_err(format!("create SSE transport: {e}")))?;

                ().serve(transport)
                    .await
                    .map_err(|e| connect_err(format!("initialize SSE client: {e}")))?
            }

            ServerConfig::StreamableHttp { url } => {
                let url = parse_url(server_id, url)?;
                let transport = StreamableHttpClientTransport::from_uri(url.to_string());

                ().serve(transport)
                    .await
                    .map_err(|e| connect_err(format!("initialize streamable client: {e}")))?
            }
        };

        tracing::info!(
            name: "mcp.server.connected",
            server_id = %server_id,
            transport = config.transport_name(),
            "Connected to MCP server"
        );

        Ok(Self {
            server_id: server_id.to_string(),
            service,
        })
    }
}

fn parse_url(server_id: &str, raw: &str) -> Result<Url, McpError> {
    let expanded = expand_env_placeholders(raw);
    Url::parse(&expanded).map_err(|e| {
        McpError::InvalidConfig(format!("invalid url for MCP server '{server_id}': {e}"))
    })
}

#[async_trait]
impl ToolSession for McpSession {
    async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        let tools = self
            .service
            .list_all_tools()
            .await
            .map_err(|e| McpError::ListTools {
                server: self.server_id.clone(),
                message: e.to_string(),
            })?;

        Ok(tools.into_iter().map(McpTool::from).collect())
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<String, McpError> {
        let result = self
            .service
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: Some(arguments),
            })
            .await
            .map_err(|e| McpError::CallTool {
                server: self.server_id.clone(),
                tool: name.to_string(),
                message: e.to_string(),
            })?;

        let texts: Vec<String> = result
            .content
            .iter()
            .filter_map(|c| c.as_text().map(|t| t.text.clone()))
            .collect();

        if texts.is_empty() {
            return Err(McpError::MalformedResult {
                server: self.server_id.clone(),
                tool: name.to_string(),
                reason: "result has no text content".to_string(),
            });
        }

        let text = texts.join("\n");
        if result.is_error.unwrap_or(false) {
            return Err(McpError::ToolFailed { message: text });
        }

        Ok(text)
    }

    async fn close(self: Box<Self>) {
        let Self { server_id, service } = *self;
        match service.cancel().await {
            Ok(reason) => {
                tracing::debug!(server_id = %server_id, reason = ?reason, "MCP session closed");
            }
            Err(e) => {
                tracing::warn!(server_id = %server_id, error = %e, "MCP session did not shut down cleanly");
            }
        }
    }
}

/// Opens sessions for server configs.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn open(
        &self,
        server_id: &str,
        config: &ServerConfig,
    ) -> Result<Box<dyn ToolSession>, McpError>;
}

/// Connector that opens real rmcp sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct RmcpConnector;

#[async_trait]
impl SessionConnector for RmcpConnector {
    async fn open(
        &self,
        server_id: &str,
        config: &ServerConfig,
    ) -> Result<Box<dyn ToolSession>, McpError> {
        Ok(Box::new(McpSession::connect(server_id, config).await?))
    }
}

/// Live sessions keyed by server identifier.
#[derive(Default)]
pub struct SessionManager {
    sessions: BTreeMap<String, Box<dyn ToolSession>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("servers", &self.sessions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SessionManager {
    /// An empty manager with no sessions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a server over rmcp. See [`SessionManager::connect_with`].
    pub async fn connect(
        &mut self,
        server_id: &str,
        config: &ServerConfig,
    ) -> Result<Vec<McpTool>, McpError> {
        self.connect_with(&RmcpConnector, server_id, config).await
    }

    /// Connect a server, register it, and return its initial tool listing.
    ///
    /// On failure nothing is registered; already connected servers are
    /// unaffected.
    pub async fn connect_with(
        &mut self,
        connector: &dyn SessionConnector,
        server_id: &str,
        config: &ServerConfig,
    ) -> Result<Vec<McpTool>, McpError> {
        let session = connector.open(server_id, config).await?;
        let tools = match session.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                session.close().await;
                return Err(e);
            }
        };

        for tool in &tools {
            tracing::info!(name: "mcp.tool.discovered", server_id = %server_id, tool = %tool.name, "MCP tool discovered");
        }

        self.insert(server_id, session).await;
        Ok(tools)
    }

    /// Connect every server named by `mode` and return the initial listings
    /// of those that came up, in server-id order.
    ///
    /// In single-server mode a failure is returned as is. In multi-server
    /// mode failing servers are logged and skipped, and it is an error only
    /// when none connect.
    pub async fn connect_all(
        &mut self,
        connector: &dyn SessionConnector,
        mode: &ServerMode,
    ) -> Result<Vec<(String, Vec<McpTool>)>, McpError> {
        match mode {
            ServerMode::Single { server_id, config } => {
                let tools = self.connect_with(connector, server_id, config).await?;
                Ok(vec![(server_id.clone(), tools)])
            }
            ServerMode::Multi(servers) => {
                let mut connected = Vec::with_capacity(servers.len());
                for (server_id, config) in servers {
                    match self.connect_with(connector, server_id, config).await {
                        Ok(tools) => connected.push((server_id.clone(), tools)),
                        Err(e) => {
                            tracing::error!(server_id = %server_id, error = %e, "Failed to connect MCP server, skipping");
                        }
                    }
                }
                if connected.is_empty() {
                    return Err(McpError::NoServersConnected(servers.len()));
                }
                Ok(connected)
            }
        }
    }

    /// Register an already open session, closing any session it replaces.
    pub async fn insert(&mut self, server_id: impl Into<String>, session: Box<dyn ToolSession>) {
        let server_id = server_id.into();
        if let Some(previous) = self.sessions.insert(server_id.clone(), session) {
            tracing::warn!(server_id = %server_id, "Replacing existing MCP session");
            previous.close().await;
        }
    }

    /// Fresh tool listings for every session, in server-id order.
    ///
    /// A server whose listing fails is logged and reported with no tools,
    /// so the others stay usable and keep their namespaced names.
    pub async fn list_tools(&self) -> Vec<(String, Vec<McpTool>)> {
        let mut listings = Vec::with_capacity(self.sessions.len());
        for (server_id, session) in &self.sessions {
            let tools = match session.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    tracing::warn!(server_id = %server_id, error = %e, "Failed to list MCP tools, skipping server");
                    Vec::new()
                }
            };
            listings.push((server_id.clone(), tools));
        }
        listings
    }

    /// Run a tool on one server.
    pub async fn execute(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: Map<String, Value>,
    ) -> Result<String, McpError> {
        let session = self
            .sessions
            .get(server_id)
            .ok_or_else(|| McpError::UnknownServer(server_id.to_string()))?;
        session.call_tool(tool_name, arguments).await
    }

    /// Identifiers of the connected servers, in order.
    pub fn server_ids(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    /// Number of connected servers.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when no server is connected.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Close every open session.
    pub async fn close_all(&mut self) {
        let sessions = std::mem::take(&mut self.sessions);
        for (server_id, session) in sessions {
            tracing::debug!(server_id = %server_id, "Closing MCP session");
            session.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    struct FakeSession {
        tools: Vec<McpTool>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ToolSession for FakeSession {
        async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
            Ok(self.tools.clone())
        }

        async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<String, McpError> {
            Ok(format!("{name}:{}", Value::Object(arguments)))
        }

        async fn close(self: Box<Self>) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fake(names: &[&str], closed: &Arc<AtomicUsize>) -> Box<dyn ToolSession> {
        Box::new(FakeSession {
            tools: names
                .iter()
                .map(|n| McpTool {
                    name: (*n).to_string(),
                    description: None,
                    input_schema: serde_json::json!({"type": "object"}),
                })
                .collect(),
            closed: Arc::clone(closed),
        })
    }

    #[tokio::test]
    async fn test_execute_routes_to_named_server() {
        let closed = Arc::new(AtomicUsize::new(0));
        let mut manager = SessionManager::new();
        manager.insert("server1", fake(&["search"], &closed)).await;

        let mut args = Map::new();
        args.insert("q".to_string(), Value::from("rust"));
        let out = manager.execute("server1", "search", args).await.unwrap();
        assert_eq!(out, r#"search:{"q":"rust"}"#);
    }

    #[tokio::test]
    async fn test_execute_unknown_server_fails() {
        let manager = SessionManager::new();
        let err = manager.execute("ghost", "search", Map::new()).await.unwrap_err();
        assert!(matches!(err, McpError::UnknownServer(ref s) if s == "ghost"));
    }

    #[tokio::test]
    async fn test_list_tools_in_server_order() {
        let closed = Arc::new(AtomicUsize::new(0));
        let mut manager = SessionManager::new();
        manager.insert("server2", fake(&["b"], &closed)).await;
        manager.insert("server1", fake(&["a"], &closed)).await;

        let listings = manager.list_tools().await;
        let ids: Vec<_> = listings.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, ["server1", "server2"]);
    }

    struct UnlistableSession;

    #[async_trait]
    impl ToolSession for UnlistableSession {
        async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
            Err(McpError::ListTools {
                server: "flaky".to_string(),
                message: "connection closed".to_string(),
            })
        }

        async fn call_tool(&self, _name: &str, _arguments: Map<String, Value>) -> Result<String, McpError> {
            unreachable!("never called")
        }

        async fn close(self: Box<Self>) {}
    }

    #[tokio::test]
    async fn test_list_tools_skips_failing_server() {
        let closed = Arc::new(AtomicUsize::new(0));
        let mut manager = SessionManager::new();
        manager.insert("flaky", Box::new(UnlistableSession)).await;
        manager.insert("weather", fake(&["get_weather"], &closed)).await;

        let listings = manager.list_tools().await;
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].0, "flaky");
        assert!(listings[0].1.is_empty());
        assert_eq!(listings[1].0, "weather");
        assert_eq!(listings[1].1[0].name, "get_weather");
    }

    /// Opens fake sessions, refusing the servers named in `down`.
    struct FakeConnector {
        down: Vec<&'static str>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SessionConnector for FakeConnector {
        async fn open(
            &self,
            server_id: &str,
            _config: &ServerConfig,
        ) -> Result<Box<dyn ToolSession>, McpError> {
            if self.down.iter().any(|d| *d == server_id) {
                return Err(McpError::Connect {
                    server: server_id.to_string(),
                    message: "connection refused".to_string(),
                });
            }
            Ok(fake(&["get_weather"], &self.closed))
        }
    }

    fn two_servers() -> ServerMode {
        let sse = |url: &str| ServerConfig::Sse {
            url: url.to_string(),
        };
        ServerMode::Multi(BTreeMap::from([
            ("amap".to_string(), sse("http://localhost:1/sse")),
            ("weather".to_string(), sse("http://localhost:8000/sse")),
        ]))
    }

    #[tokio::test]
    async fn test_connect_all_skips_unreachable_server() {
        let connector = FakeConnector {
            down: vec!["amap"],
            closed: Arc::new(AtomicUsize::new(0)),
        };
        let mut manager = SessionManager::new();

        let connected = manager.connect_all(&connector, &two_servers()).await.unwrap();
        assert_eq!(connected.len(), 1);
        assert_eq!(connected[0].0, "weather");
        assert_eq!(manager.server_ids().collect::<Vec<_>>(), ["weather"]);
    }

    #[tokio::test]
    async fn test_connect_all_fails_when_every_server_is_down() {
        let connector = FakeConnector {
            down: vec!["amap", "weather"],
            closed: Arc::new(AtomicUsize::new(0)),
        };
        let mut manager = SessionManager::new();

        let err = manager.connect_all(&connector, &two_servers()).await.unwrap_err();
        assert!(matches!(err, McpError::NoServersConnected(2)));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_connect_all_single_server_failure_is_fatal() {
        let connector = FakeConnector {
            down: vec!["weather_server"],
            closed: Arc::new(AtomicUsize::new(0)),
        };
        let mode = ServerMode::Single {
            server_id: "weather_server".to_string(),
            config: ServerConfig::sse(None),
        };
        let mut manager = SessionManager::new();

        let err = manager.connect_all(&connector, &mode).await.unwrap_err();
        assert!(matches!(err, McpError::Connect { ref server, .. } if server == "weather_server"));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_close_all_releases_every_session() {
        let closed = Arc::new(AtomicUsize::new(0));
        let mut manager = SessionManager::new();
        manager.insert("a", fake(&[], &closed)).await;
        manager.insert("b", fake(&[], &closed)).await;
        // replacing closes the old session
        manager.insert("b", fake(&[], &closed)).await;
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        manager.close_all().await;
        assert!(manager.is_empty());
        assert_eq!(closed.load(Ordering::SeqCst), 3);
    }
}
