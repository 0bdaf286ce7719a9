//! RagSage — retrieval-augmented chat over Microsoft 365 content.

use std::sync::Arc;

use ragsage_auth::TokenProvider;
use ragsage_core::AgentConfig;
use ragsage_server::{build_orchestrator, build_router, console, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn load_config() -> anyhow::Result<AgentConfig> {
    let path = AgentConfig::resolve_path();
    let config = AgentConfig::load(&path)?;
    info!(
        "Authentication mode: {:?}, retrieval endpoint: {}",
        config.microsoft365.auth_mode(),
        config.microsoft365.copilot_retrieval_endpoint
    );
    Ok(config)
}

async fn serve(config: AgentConfig) -> anyhow::Result<()> {
    let port = config.port;
    let state = Arc::new(AppState::from_config(config)?);
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("RagSage server listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn chat_console(config: AgentConfig) -> anyhow::Result<()> {
    // One provider per console session; the override below is session-local.
    let tokens = Arc::new(TokenProvider::from_options(&config.microsoft365));
    if let Ok(token) = std::env::var("RAGSAGE_ACCESS_TOKEN") {
        tokens.set_external_token(token);
        info!("Using access token from RAGSAGE_ACCESS_TOKEN");
    }

    let orchestrator = build_orchestrator(&config, tokens)?;
    info!("Azure AI Chat Agent with SharePoint RAG started");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    console::run(&orchestrator, stdin, &mut stdout, || async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "chat" | "--chat" => return chat_console(load_config()?).await,
            "serve" | "--serve" => {}
            "--help" | "-h" | "help" => {
                println!("RagSage — retrieval-augmented chat over Microsoft 365 content");
                println!();
                println!("Usage: ragsage [command]");
                println!();
                println!("Commands:");
                println!("  (none), serve            Start the HTTP server");
                println!("  chat                     Start the interactive console");
                println!("  help                     Show this help message");
                println!();
                println!("Configuration: appsettings.json in the working directory, or RAGSAGE_CONFIG");
                return Ok(());
            }
            _ => {
                eprintln!("Unknown command: {}. Use 'ragsage help' for usage.", args[1]);
                std::process::exit(1);
            }
        }
    }

    serve(load_config()?).await
}
