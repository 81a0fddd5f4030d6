//! popupd: interactive popup prompts over JSON-RPC 2.0.
//!
//! Serves `healthCheck` and `triggerPopup` over newline-delimited stdio and
//! HTTP (`POST /mcp`, `GET /health`). A host embeds the library and attaches
//! a popup sink; run standalone, `triggerPopup` answers "Popup system not
//! available" until a sink is attached.
//!
//! ## Subcommands
//!
//! - `serve` - start the server (default)
//! - `health` - query a running server's health endpoint

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use popupd::{Config, PopupServer};

// ============================================================================
// CLI Types
// ============================================================================

#[derive(Parser)]
#[command(name = "popupd")]
#[command(about = "Interactive popup prompts over JSON-RPC 2.0")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the RPC server (default)
    Serve {
        /// Config file path (default: ./popupd.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the HTTP port (0 = auto-assign)
        #[arg(long)]
        port: Option<u16>,

        /// Disable the stdio transport
        #[arg(long)]
        no_stdio: bool,
    },

    /// Query a running server's health endpoint
    Health {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value_t = popupd::config::DEFAULT_HTTP_PORT)]
        port: u16,
    },
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr: stdout is the stdio transport.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("popupd=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve {
        config: None,
        port: None,
        no_stdio: false,
    }) {
        Commands::Serve {
            config,
            port,
            no_stdio,
        } => run_serve(config, port, no_stdio).await,
        Commands::Health { host, port } => run_health(&host, port).await,
    }
}

async fn run_serve(
    config_path: Option<PathBuf>,
    port: Option<u16>,
    no_stdio: bool,
) -> anyhow::Result<()> {
    let mut config = Config::load(config_path.as_deref())?;
    if let Some(port) = port {
        config.http.port = port;
    }
    if no_stdio {
        config.stdio.enabled = false;
    }

    let mut server = PopupServer::new(config);
    server.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to install ctrl-c handler")?;
    info!("Received ctrl-c, initiating graceful shutdown");

    server.stop().await;
    Ok(())
}

async fn run_health(host: &str, port: u16) -> anyhow::Result<()> {
    let url = format!("http://{host}:{port}/health");
    info!(url = %url, "Checking server health");

    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("Failed to reach {url}"))?;
    if !response.status().is_success() {
        bail!("Health endpoint returned {}", response.status());
    }

    let health: serde_json::Value = response.json().await.context("Invalid health payload")?;
    println!("{}", serde_json::to_string_pretty(&health)?);

    if health["status"] != "active" {
        bail!("Server is not active");
    }
    Ok(())
}
