//! Model Context Protocol (MCP) client side.
//!
//! This module connects to stdio, SSE, and streamable-HTTP MCP servers,
//! keeps their sessions keyed by server identifier, and flattens their
//! tools into one LLM-facing list.
//!
//! # Configuration
//!
//! Servers are configured under `mcp_servers` in the application config:
//!
//! ```yaml
//! mcp_servers:
//!   weather:
//!     transport: stdio
//!     command: python
//!     args: ["servers/weather_server.py"]
//!   amap:
//!     transport: sse
//!     url: "https://mcp.amap.com/sse?key=${AMAP_KEY}"
//! ```
//!
//! # Tool Namespacing
//!
//! With more than one server connected, tools are advertised as
//! `<server_id>_<tool_name>` (e.g., `weather_get_weather`) and routed back
//! through the registry index rather than by splitting the name.

pub mod config;
pub mod error;
pub mod registry;
pub mod session;
pub mod types;

pub use error::McpError;
pub use registry::{RequiredPolicy, ToolDescriptor, ToolRegistry};
pub use session::{McpSession, RmcpConnector, SessionConnector, SessionManager, ToolSession};
pub use types::McpTool;
