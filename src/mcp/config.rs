//! MCP server configuration.
//!
//! A [`ServerConfig`] describes how to reach one server. A [`ServerMode`]
//! is the set of servers to connect at startup.

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
};

/// Default SSE endpoint of the demo weather server.
pub const DEFAULT_SSE_URL: &str = "http://localhost:8000/sse";

/// How to reach one MCP server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum ServerConfig {
    /// Spawn a subprocess and speak over its stdin/stdout.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Connect to a server-sent-event endpoint.
    Sse { url: String },
    /// Connect to a streamable HTTP endpoint.
    StreamableHttp { url: String },
}

/// Transport choice for a single server script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Stdio,
    Sse,
}

impl ServerConfig {
    /// Build the config for a local server.
    ///
    /// `.py` scripts run under `python` and `.js` scripts under `node`; any
    /// other path is run directly as the server command. With the SSE
    /// transport the server is expected to be running already and only the
    /// URL is used.
    pub fn from_script(script: &Path, transport: TransportKind, sse_url: Option<&str>) -> Self {
        match transport {
            TransportKind::Stdio => {
                let path = script.to_string_lossy().into_owned();
                let (command, args) = match script.extension().and_then(|e| e.to_str()) {
                    Some("py") => ("python".to_string(), vec![path]),
                    Some("js") => ("node".to_string(), vec![path]),
                    _ => (path, Vec::new()),
                };
                Self::Stdio {
                    command,
                    args,
                    env: HashMap::new(),
                }
            }
            TransportKind::Sse => Self::sse(sse_url),
        }
    }

    /// SSE config for `url`, or the demo server's default endpoint.
    pub fn sse(url: Option<&str>) -> Self {
        Self::Sse {
            url: url.unwrap_or(DEFAULT_SSE_URL).to_string(),
        }
    }

    /// Short transport name for logs.
    pub fn transport_name(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Sse { .. } => "sse",
            Self::StreamableHttp { .. } => "streamable_http",
        }
    }
}

/// Which servers to connect at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMode {
    /// One server from the command line; failing to connect is fatal.
    Single { server_id: String, config: ServerConfig },
    /// Servers from the config file; failing ones are skipped.
    Multi(BTreeMap<String, ServerConfig>),
}

/// Expand "${VAR}" placeholders from the process environment.
/// Missing variables leave the placeholder unchanged.
pub fn expand_env_placeholders(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

/// Expand placeholders in every value of an env map.
pub fn expand_env_map(map: &HashMap<String, String>) -> HashMap<String, String> {
    map.iter()
        .map(|(k, v)| (k.clone(), expand_env_placeholders(v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_python_script_runs_under_python() {
        let cfg = ServerConfig::from_script(
            &PathBuf::from("servers/weather_server.py"),
            TransportKind::Stdio,
            None,
        );
        assert_eq!(
            cfg,
            ServerConfig::Stdio {
                command: "python".to_string(),
                args: vec!["servers/weather_server.py".to_string()],
                env: HashMap::new(),
            }
        );
    }

    #[test]
    fn test_sse_script_uses_default_url() {
        let cfg = ServerConfig::from_script(&PathBuf::from("server.js"), TransportKind::Sse, None);
        assert_eq!(
            cfg,
            ServerConfig::Sse {
                url: DEFAULT_SSE_URL.to_string()
            }
        );
    }

    #[test]
    fn test_other_paths_run_directly() {
        let cfg = ServerConfig::from_script(
            &PathBuf::from("target/debug/weather-server"),
            TransportKind::Stdio,
            None,
        );
        assert_eq!(
            cfg,
            ServerConfig::Stdio {
                command: "target/debug/weather-server".to_string(),
                args: Vec::new(),
                env: HashMap::new(),
            }
        );
    }

    #[test]
    fn test_deserialize_tagged_entries() {
        let json = r#"{
            "weather": {"transport": "sse", "url": "http://localhost:8000/sse"},
            "local": {"transport": "stdio", "command": "python", "args": ["w.py"]}
        }"#;
        let servers: HashMap<String, ServerConfig> = serde_json::from_str(json).unwrap();
        assert_eq!(servers["weather"].transport_name(), "sse");
        assert!(matches!(
            &servers["local"],
            ServerConfig::Stdio { command, args, .. } if command == "python" && args == &["w.py"]
        ));
    }

    #[test]
    fn test_expand_env_placeholders() {
        // PATH is always set; an unlikely name is never set
        let path = std::env::var("PATH").unwrap();
        assert_eq!(
            expand_env_placeholders("a=${PATH};b=${MCP_CHAT_SURELY_UNSET_VAR}"),
            format!("a={path};b=${{MCP_CHAT_SURELY_UNSET_VAR}}")
        );
        assert_eq!(expand_env_placeholders("no placeholders"), "no placeholders");
        assert_eq!(expand_env_placeholders("dangling ${OPEN"), "dangling ${OPEN");
    }
}
