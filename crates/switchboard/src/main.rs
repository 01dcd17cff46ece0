//! Switchboard: relay between a Discord bot and a live web dashboard.
//!
//! Connects to the Discord gateway, records every inbound message in a
//! bounded history, and serves that history, guild/channel metadata and a
//! live snapshot stream over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use miette::Result;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use switchboard_discord::{
    ChatGateway, DEFAULT_API_URL, DEFAULT_GATEWAY_URL, DiscordAdapter, DiscordClient,
    GatewayClient, GuildDirectory,
};
use switchboard_relay::{Relay, RelayConfig};

mod commands;
mod ingest;

use ingest::Ingest;

/// Buffered gateway events awaiting ingest.
const EVENT_BUFFER: usize = 256;

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Relay between a Discord bot and a live web dashboard", long_about = None)]
struct Cli {
    /// Discord bot token
    #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true)]
    token: String,

    /// Address the web server listens on
    #[arg(long, env = "SWITCHBOARD_LISTEN", default_value = "127.0.0.1:5000")]
    listen: SocketAddr,

    /// Message history file
    #[arg(long, env = "SWITCHBOARD_HISTORY_FILE", default_value = "log/messages.json")]
    history_file: PathBuf,

    /// Number of messages kept in the history file
    #[arg(long, env = "SWITCHBOARD_HISTORY_CAPACITY", default_value = "100")]
    history_capacity: usize,

    /// Messages fetched when a channel is first opened
    #[arg(long, default_value = "10")]
    backfill_limit: usize,

    /// Messages fetched per forward backfill
    #[arg(long, default_value = "50")]
    incremental_limit: usize,

    /// Interval between live stream snapshots, in milliseconds
    #[arg(long, default_value = "1000")]
    stream_interval_ms: u64,

    /// Prefix of chat commands
    #[arg(long, env = "SWITCHBOARD_COMMAND_PREFIX", default_value = "!")]
    command_prefix: String,

    /// Discord REST API base URL
    #[arg(long, env = "DISCORD_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Discord gateway URL
    #[arg(long, env = "DISCORD_GATEWAY_URL", default_value = DEFAULT_GATEWAY_URL)]
    gateway_url: String,

    /// Static files directory, served under /static
    #[arg(long)]
    static_dir: Option<PathBuf>,
}

impl Cli {
    fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            history_path: self.history_file.clone(),
            history_capacity: self.history_capacity,
            backfill_limit: self.backfill_limit,
            incremental_limit: self.incremental_limit,
            stream_interval: Duration::from_millis(self.stream_interval_ms.max(1)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                "switchboard=info,switchboard_relay=info,switchboard_web=info,switchboard_discord=info"
                    .to_string()
            }),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle shutdown signals
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = signal_tx.send(true);
    });

    let directory = Arc::new(GuildDirectory::new());
    let client = DiscordClient::new(&cli.api_url, &cli.token)
        .map_err(|e| miette::miette!("failed to create Discord client: {}", e))?;
    let gateway: Arc<dyn ChatGateway> =
        Arc::new(DiscordAdapter::new(client, Arc::clone(&directory)));

    let relay = Relay::open(cli.relay_config(), Arc::clone(&gateway), shutdown_rx.clone()).await;

    // Gateway session feeding the ingest loop
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let gateway_client = GatewayClient::new(&cli.gateway_url, &cli.token, directory);
    let gateway_shutdown = shutdown_rx.clone();
    let fatal_tx = shutdown_tx.clone();
    let gateway_handle = tokio::spawn(async move {
        let result = gateway_client.run(events_tx, gateway_shutdown).await;
        if result.is_err() {
            // Without a session there is nothing to relay.
            let _ = fatal_tx.send(true);
        }
        result
    });

    let ingest_handle = tokio::spawn(Ingest::new(relay.clone(), cli.command_prefix.clone()).run(events_rx));

    let router = switchboard_web::create_router(relay, cli.static_dir.as_deref());
    let listener = tokio::net::TcpListener::bind(cli.listen)
        .await
        .map_err(|e| miette::miette!("failed to bind {}: {}", cli.listen, e))?;
    info!(addr = %cli.listen, "web server listening");

    let mut server_shutdown = shutdown_rx.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .map_err(|e| miette::miette!("HTTP server error: {}", e))?;
    info!("web server stopped");

    let _ = shutdown_tx.send(true);
    let gateway_result = gateway_handle
        .await
        .map_err(|e| miette::miette!("gateway task failed: {}", e))?;
    if let Err(e) = ingest_handle.await {
        error!(error = %e, "ingest task failed");
    }

    gateway_result.map_err(|e| miette::miette!("Discord gateway stopped: {}", e))?;
    info!("shutdown complete");
    Ok(())
}
