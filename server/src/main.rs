use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{info, warn};

use server::config::ServerConfig;
use server::{app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting conversational assistant server...");

    let config = ServerConfig::from_env();
    if config.api_key.is_none() {
        warn!("GEMINI_API_KEY not set, conversations will report a configuration error");
    }
    info!(
        "Server configuration loaded: port={}, text_model={}, speech_model={}, voice={}",
        config.port, config.text_model, config.speech_model, config.speech_voice
    );

    let port = config.port;
    let state = AppState { config };
    let app = app(state);

    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT."))?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
