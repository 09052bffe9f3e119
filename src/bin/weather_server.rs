//! Demo weather tool server.
//!
//! Serves one canned `get_weather` tool over stdio or SSE so the chat client
//! has something to talk to.

use std::net::SocketAddr;

use clap::Parser;
use rmcp::{
    ErrorData as McpError, ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router,
    transport::{sse_server::SseServer, stdio},
};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use mcp_chat::mcp::config::TransportKind;

const DEFAULT_DATE: &str = "今天";

#[derive(Parser, Debug)]
#[command(author, version, about = "Demo MCP weather server", long_about = None)]
struct Args {
    /// Transport to serve on
    #[arg(long, value_enum, default_value = "stdio")]
    transport: TransportKind,

    /// Listen address for the SSE transport
    #[arg(long, default_value = "127.0.0.1:8000")]
    bind: SocketAddr,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
struct WeatherRequest {
    /// City name
    city: String,
    /// Date, e.g. 今天 or 明天
    #[serde(default = "default_date")]
    date: String,
}

fn default_date() -> String {
    DEFAULT_DATE.to_string()
}

fn weather_report(city: &str, date: &str) -> String {
    format!("{city}{date}的天气：温度 25°C，晴朗")
}

#[derive(Debug, Clone)]
struct Weather {
    tool_router: ToolRouter<Weather>,
}

#[tool_router]
impl Weather {
    fn new() -> Self {
        Self {
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Get the weather for a city on a given date")]
    fn get_weather(
        &self,
        Parameters(WeatherRequest { city, date }): Parameters<WeatherRequest>,
    ) -> Result<CallToolResult, McpError> {
        info!(city = %city, date = %date, "get_weather called");
        Ok(CallToolResult::success(vec![Content::text(weather_report(
            &city, &date,
        ))]))
    }
}

#[tool_handler]
impl ServerHandler for Weather {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some("Canned weather reports for demo purposes".to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol in stdio mode
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    match args.transport {
        TransportKind::Stdio => {
            info!("Serving weather tools on stdio");
            let service = Weather::new().serve(stdio()).await?;
            service.waiting().await?;
        }
        TransportKind::Sse => {
            info!(bind = %args.bind, "Serving weather tools on SSE at /sse");
            let ct = SseServer::serve(args.bind).await?.with_service(Weather::new);
            tokio::signal::ctrl_c().await?;
            ct.cancel();
        }
    }

    Ok(())
}
