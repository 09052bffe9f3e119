//! MCP Chat
//!
//! Entry point for the interactive MCP chat client.

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::missing_fields_in_debug)]

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::process::ExitCode;

use dotenvy::dotenv;
use tokio::io::BufReader;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use mcp_chat::ChatClient;
use mcp_chat::config::{AppConfig, ServerMode};
use mcp_chat::conversation::ConversationHistory;
use mcp_chat::llm::Orchestrator;
use mcp_chat::mcp::session::{RmcpConnector, SessionManager};
use mcp_chat::shell::{self, ShellExit};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing (M-LOG-STRUCTURED); stdout belongs to the shell
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load .env (if present)
    let _ = dotenv();

    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Fatal error");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let mode = config.server_mode()?;
    let settings = config.llm.settings()?;

    info!(
        base_url = %settings.base_url,
        model = %settings.model,
        protocol = ?settings.protocol,
        provider = ?settings.provider,
        "LLM configured"
    );

    let sessions = connect_servers(&mode).await?;

    let orchestrator = Orchestrator::from_settings(settings)
        .with_max_tool_iterations(config.orchestrator.max_tool_iterations());
    let mut client = ChatClient::new(orchestrator, sessions, config.orchestrator.required_policy);
    if let Some(prompt) = &config.llm.system_prompt {
        client = client.with_history(ConversationHistory::with_system_prompt(prompt.clone()));
    }

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let result = shell::run(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        &mut client,
        interrupt,
    )
    .await;

    client.shutdown().await;

    match result? {
        ShellExit::Quit => info!("Exiting on quit command"),
        ShellExit::Interrupted => info!("Exiting on interrupt"),
        ShellExit::EndOfInput => info!("Exiting at end of input"),
    }
    Ok(())
}

async fn connect_servers(mode: &ServerMode) -> anyhow::Result<SessionManager> {
    let mut sessions = SessionManager::new();
    let connected = sessions.connect_all(&RmcpConnector, mode).await?;

    for (server_id, tools) in &connected {
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        match mode {
            ServerMode::Single { .. } => println!("\nConnected to server with tools: {names:?}"),
            ServerMode::Multi(_) => {
                println!("\nConnected to server {server_id} with tools: {names:?}");
            }
        }
    }

    Ok(sessions)
}
