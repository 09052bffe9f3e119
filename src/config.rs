//! Application configuration.
//!
//! Sources, lowest priority first: built-in defaults, an optional config
//! file, `MCP_CHAT__*` environment variables, then command-line flags (which
//! also read their own environment variables through clap).

use crate::llm::{LlmProtocol, LlmSettings, Provider, provider::DEFAULT_AZURE_API_VERSION};
pub use crate::mcp::config::ServerMode;
use crate::mcp::config::{ServerConfig, TransportKind};
use crate::mcp::registry::RequiredPolicy;
use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

const DEFAULT_CONFIG_BASENAME: &str = "mcp-chat";

const DEFAULT_OPENAI_BASE_URL: &str = "http://localhost:11434/v1";
const DEFAULT_OPENAI_MODEL: &str = "qwen2.5";
const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-20241022";

#[derive(Parser, Debug)]
#[command(author, version, about = "Interactive chat client for MCP tool servers", long_about = None)]
pub struct Cli {
    /// Server to run: a .py or .js script, or an executable; omit to use `mcp_servers` from the config
    #[arg(value_name = "SERVER_SCRIPT")]
    pub server_script: Option<PathBuf>,

    /// Config file path
    #[arg(short, long, env = "MCP_CHAT_CONFIG")]
    pub config: Option<String>,

    /// Transport used to reach the server script
    #[arg(long, value_enum)]
    pub transport: Option<TransportKind>,

    /// SSE endpoint when the transport is sse
    #[arg(long, env = "MCP_SSE_URL")]
    pub sse_url: Option<String>,

    /// Tool-calling convention: auto, openai, anthropic
    #[arg(long, env = "LLM_PROTOCOL")]
    pub protocol: Option<String>,

    /// LLM API base URL
    #[arg(long, env = "LLM_BASE_URL")]
    pub base_url: Option<String>,

    /// Model identifier
    #[arg(long, env = "LLM_MODEL")]
    pub model: Option<String>,

    /// Cap on tool-call rounds per query (0 = unlimited)
    #[arg(long)]
    pub max_tool_iterations: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, ServerConfig>,
    #[serde(default)]
    pub server_script: Option<PathBuf>,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default)]
    pub sse_url: Option<String>,
}

#[derive(Deserialize, Clone)]
pub struct LlmConfig {
    pub protocol: LlmProtocol,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
    pub azure_deployment: Option<String>,
    pub azure_api_version: Option<String>,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("protocol", &self.protocol)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("system_prompt", &self.system_prompt)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrchestratorConfig {
    pub max_tool_iterations: usize,
    pub required_policy: RequiredPolicy,
}

impl OrchestratorConfig {
    /// Iteration cap, `None` when configured as 0.
    pub fn max_tool_iterations(&self) -> Option<usize> {
        (self.max_tool_iterations > 0).then_some(self.max_tool_iterations)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args).map_err(|e| ConfigError::Message(e.to_string()))?;
        Self::from_cli(&cli)
    }

    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // 1. Defaults
        builder = builder
            .set_default("llm.protocol", "auto")?
            .set_default("llm.temperature", 0.2)?
            .set_default("llm.max_tokens", 1000)?
            .set_default("orchestrator.max_tool_iterations", 10)?
            .set_default("orchestrator.required_policy", "all_properties")?
            .set_default("transport", "stdio")?;

        // 2. Config file
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false)),
        };

        // 3. Environment, e.g. MCP_CHAT__LLM__MODEL=qwen2.5
        builder = builder.add_source(
            Environment::with_prefix("MCP_CHAT")
                .separator("__")
                .try_parsing(true),
        );

        // 4. CLI overrides
        if let Some(script) = &cli.server_script {
            builder = builder.set_override("server_script", script.to_string_lossy().into_owned())?;
        }
        if let Some(transport) = cli.transport {
            let name = match transport {
                TransportKind::Stdio => "stdio",
                TransportKind::Sse => "sse",
            };
            builder = builder.set_override("transport", name)?;
        }
        if let Some(url) = &cli.sse_url {
            builder = builder.set_override("sse_url", url.as_str())?;
        }
        if let Some(protocol) = &cli.protocol {
            builder = builder.set_override("llm.protocol", protocol.to_lowercase())?;
        }
        if let Some(base_url) = &cli.base_url {
            builder = builder.set_override("llm.base_url", base_url.as_str())?;
        }
        if let Some(model) = &cli.model {
            builder = builder.set_override("llm.model", model.as_str())?;
        }
        if let Some(max) = cli.max_tool_iterations {
            builder = builder.set_override("orchestrator.max_tool_iterations", max as u64)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }

    /// Decide which servers to connect.
    ///
    /// A server script selects single-server mode. So does the SSE transport
    /// without a script, since the server is already running at `sse_url`.
    pub fn server_mode(&self) -> Result<ServerMode, ConfigError> {
        if let Some(script) = &self.server_script {
            // an SSE server runs elsewhere, the path only names it
            if self.transport == TransportKind::Stdio && !script.is_file() {
                return Err(ConfigError::Message(format!(
                    "server script not found: {}",
                    script.display()
                )));
            }
            let config = ServerConfig::from_script(script, self.transport, self.sse_url.as_deref());
            let server_id = script
                .file_stem()
                .map_or_else(|| "default".to_string(), |s| s.to_string_lossy().into_owned());
            return Ok(ServerMode::Single { server_id, config });
        }

        if self.transport == TransportKind::Sse {
            return Ok(ServerMode::Single {
                server_id: "default".to_string(),
                config: ServerConfig::sse(self.sse_url.as_deref()),
            });
        }

        if self.mcp_servers.is_empty() {
            return Err(ConfigError::Message(
                "no MCP server configured: pass SERVER_SCRIPT or set mcp_servers in the config file"
                    .to_string(),
            ));
        }

        Ok(ServerMode::Multi(self.mcp_servers.clone()))
    }
}

impl LlmConfig {
    /// Resolve defaults, provider and credentials into backend settings.
    pub fn settings(&self) -> Result<LlmSettings, ConfigError> {
        let base_url = self
            .base_url
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| match self.protocol {
                LlmProtocol::Anthropic => DEFAULT_ANTHROPIC_BASE_URL.to_string(),
                LlmProtocol::Auto | LlmProtocol::OpenAi => DEFAULT_OPENAI_BASE_URL.to_string(),
            });

        let mut provider = Provider::detect_from_url(&base_url);
        if let Provider::AzureOpenAI { .. } = &provider {
            let deployment_name = self.azure_deployment.clone().ok_or_else(|| {
                ConfigError::Message("llm.azure_deployment is required for Azure OpenAI".to_string())
            })?;
            provider = Provider::AzureOpenAI {
                deployment_name,
                api_version: self
                    .azure_api_version
                    .clone()
                    .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
            };
        }

        let protocol = self.protocol.resolve(&provider);

        let model = self
            .model
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| match protocol {
                LlmProtocol::Anthropic => DEFAULT_ANTHROPIC_MODEL.to_string(),
                LlmProtocol::Auto | LlmProtocol::OpenAi => DEFAULT_OPENAI_MODEL.to_string(),
            });

        let vendor_var = match protocol {
            LlmProtocol::Anthropic => "ANTHROPIC_API_KEY",
            LlmProtocol::Auto | LlmProtocol::OpenAi => "OPENAI_API_KEY",
        };
        let api_key = self
            .api_key
            .clone()
            .or_else(|| env::var(vendor_var).ok())
            .or_else(|| env::var("LLM_API_KEY").ok())
            .filter(|s| !s.trim().is_empty());

        if protocol == LlmProtocol::Anthropic && api_key.is_none() {
            return Err(ConfigError::Message(
                "an API key is required for the Anthropic protocol: set ANTHROPIC_API_KEY or llm.api_key"
                    .to_string(),
            ));
        }

        Ok(LlmSettings {
            base_url,
            api_key,
            model,
            protocol,
            provider,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        })
    }
}
