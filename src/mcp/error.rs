//! Errors raised at the MCP session boundary.

/// Errors from connecting to, listing, or calling MCP servers.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// Transport setup or the initialize handshake failed.
    #[error("failed to connect MCP server '{server}': {message}")]
    Connect {
        /// Server identifier.
        server: String,
        /// Underlying failure.
        message: String,
    },

    /// The server configuration cannot be turned into a transport.
    #[error("invalid MCP server config: {0}")]
    InvalidConfig(String),

    /// Every configured server failed to connect.
    #[error("none of the {0} configured MCP servers could be connected")]
    NoServersConnected(usize),

    /// No session is registered under this identifier.
    #[error("unknown MCP server: {0}")]
    UnknownServer(String),

    /// `tools/list` failed.
    #[error("tools/list failed for MCP server '{server}': {message}")]
    ListTools {
        /// Server identifier.
        server: String,
        /// Underlying failure.
        message: String,
    },

    /// `tools/call` failed at the protocol level.
    #[error("tools/call failed for {server}::{tool}: {message}")]
    CallTool {
        /// Server identifier.
        server: String,
        /// Tool name as known by the server.
        tool: String,
        /// Underlying failure.
        message: String,
    },

    /// The call succeeded but the result has the wrong shape.
    #[error("malformed result from {server}::{tool}: {reason}")]
    MalformedResult {
        /// Server identifier.
        server: String,
        /// Tool name as known by the server.
        tool: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The tool ran and reported an error.
    #[error("{message}")]
    ToolFailed {
        /// Error text returned by the tool.
        message: String,
    },
}
