//! toolstream - streaming tool orchestration for chat-completion endpoints
//!
//! Streams a model's answer, runs the tool calls it requests against MCP
//! servers, and feeds the results back for a final answer. Runs as an
//! interactive terminal or as a websocket server.

mod api;
mod config;
mod llm;
mod runtime;
mod state_machine;
mod terminal;
mod tools;

use api::{create_router, AppState};
use config::{ChatConfig, Command};
use llm::{ChatTransport, HttpChatTransport, LoggingTransport};
use runtime::ConversationOrchestrator;
use std::path::PathBuf;
use std::sync::Arc;
use tools::ToolRegistry;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging; stderr keeps the terminal's stdout clean
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "toolstream=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let command = Command::from_args(std::env::args().skip(1))?;
    let config = ChatConfig::from_env();

    if config.api_key.is_none() {
        tracing::warn!("No API key configured. Set SILICONFLOW_API_KEY or CHAT_API_KEY.");
    }

    let http: Arc<dyn ChatTransport> = Arc::new(HttpChatTransport::new(&config)?);
    let transport: Arc<dyn ChatTransport> = Arc::new(LoggingTransport::new(http));
    tracing::info!(model = %transport.model_id(), url = %config.api_url, "Chat transport ready");

    match command {
        Command::Chat { servers } => chat(transport, &servers).await,
        Command::Serve { servers } => serve(&config, transport, servers).await,
    }
}

async fn chat(
    transport: Arc<dyn ChatTransport>,
    servers: &[PathBuf],
) -> Result<(), Box<dyn std::error::Error>> {
    let (registry, failures) = ToolRegistry::connect_scripts(servers).await;
    for (script, e) in &failures {
        eprintln!("Failed to connect {}: {e}", script.display());
    }
    if registry.is_empty() {
        tracing::warn!("No tools available, queries go to the model alone");
    }

    let mut orchestrator = ConversationOrchestrator::connect(transport, registry).await?;
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    terminal::run(&mut orchestrator, stdin, &mut stdout).await?;

    tracing::info!(
        session = %orchestrator.session_id(),
        messages = orchestrator.history().len(),
        tool_calls = orchestrator.audit().len(),
        "Session ended"
    );
    Ok(())
}

async fn serve(
    config: &ChatConfig,
    transport: Arc<dyn ChatTransport>,
    servers: Vec<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = AppState::new(config, transport, servers);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(cors)
        .layer(compression)
        .layer(TraceLayer::new_for_http());

    let addr = config.listen_addr();
    tracing::info!("toolstream server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
