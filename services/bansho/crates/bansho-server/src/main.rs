//! bansho MCP security proxy — entry point.
//!
//! Initializes tracing (to stderr — stdio transport reserves stdout
//! for JSON-RPC framing), loads configuration from `BANSHO_*`
//! environment variables, connects to Postgres and Redis, dials the
//! upstream MCP server, and serves the relay over stdio.

mod audit;
mod authn;
mod authz;
mod error;
mod pipeline;
mod ratelimit;
mod server;
mod settings;
mod state;
mod upstream;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rmcp::transport::io::stdio;
use rmcp::ServiceExt;
use tracing_subscriber::EnvFilter;

use bansho_common::Policy;

use crate::server::BanshoRelay;
use crate::settings::ServerSettings;
use crate::state::AppState;
use crate::upstream::{split_command, UpstreamConnector};

#[derive(Parser)]
#[command(name = "bansho-server", version, about = "MCP passthrough security proxy")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the listener.
    Serve {
        /// Print the loaded, secret-redacted configuration and exit
        /// without connecting to anything.
        #[arg(long)]
        print_settings: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { print_settings } => serve(print_settings).await,
    }
}

async fn serve(print_settings: bool) -> Result<()> {
    let settings = ServerSettings::load()?;

    if print_settings {
        eprintln!("{settings:#?}");
        return Ok(());
    }

    let policy = Policy::load(std::path::Path::new(&settings.policy_path))
        .with_context(|| format!("failed to load policy from {}", settings.policy_path))?;

    let state = AppState::connect(&settings.database_url, &settings.redis_url).await?;

    let upstream = connect_upstream(&settings).await?;

    tracing::info!(
        upstream_transport = %settings.upstream_transport,
        listen_transport = %settings.listen_transport,
        policy_path = %settings.policy_path,
        "bansho-server starting",
    );

    let relay = BanshoRelay::new(state, Arc::new(policy), Arc::new(upstream));
    let transport = stdio();
    let service = relay
        .serve(transport)
        .await
        .context("failed to start MCP relay over stdio")?;

    service.waiting().await.context("MCP relay exited with an error")?;

    tracing::info!("bansho-server shut down");
    Ok(())
}

async fn connect_upstream(settings: &ServerSettings) -> Result<UpstreamConnector> {
    match settings.upstream_transport.as_str() {
        "stdio" => {
            let command_line = settings
                .upstream_cmd
                .as_deref()
                .context("BANSHO_UPSTREAM_CMD is required for stdio upstream transport")?;
            let (program, args) = split_command(command_line)?;
            UpstreamConnector::connect_stdio(&program, &args).await
        }
        "http" => {
            let url = settings
                .upstream_url
                .as_deref()
                .context("BANSHO_UPSTREAM_URL is required for http upstream transport")?;
            UpstreamConnector::connect_http(url).await
        }
        other => anyhow::bail!("unsupported upstream transport {other:?}"),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}
