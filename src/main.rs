use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use tracing::info;

use livecall::{ClientConfig, VoiceSession, config};

/// Livecall - realtime voice session client
#[derive(Parser, Debug)]
#[command(name = "livecall")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Base WebSocket endpoint, e.g. ws://localhost:8000
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Agent identifier to call
    #[arg(short, long)]
    agent: Option<String>,

    /// Send a typed utterance after connecting
    #[arg(short, long)]
    text: Option<String>,

    /// Connect without opening the microphone
    #[arg(long)]
    muted: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before reading the environment)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let endpoint = cli
        .endpoint
        .or_else(|| std::env::var(config::ENDPOINT_ENV).ok())
        .unwrap_or_else(|| "ws://127.0.0.1:8000".to_string());
    let agent = cli
        .agent
        .or_else(|| std::env::var(config::AGENT_ID_ENV).ok())
        .ok_or_else(|| anyhow!("no agent id given (--agent or {})", config::AGENT_ID_ENV))?;

    let session = VoiceSession::new(ClientConfig::new(endpoint, agent));

    session.on_transcript(Arc::new(|update| {
        Box::pin(async move {
            if update.is_final {
                println!("[{}] {}", update.speaker, update.text);
            }
        })
    }));
    session.on_error(Arc::new(|err| {
        Box::pin(async move {
            eprintln!("error: {err}");
        })
    }));

    session.connect().await?;
    info!("connected, session up");

    if let Some(text) = cli.text {
        session.send_text(&text);
    }
    if !cli.muted {
        if let Err(e) = session.start_listening() {
            eprintln!("microphone unavailable, continuing without capture: {e}");
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    session.disconnect();

    Ok(())
}
