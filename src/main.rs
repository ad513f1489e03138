//! Loophole client entry point
//!
//! Connects to the tunnel server, hands over the metadata document,
//! binds whatever loopback listeners the server asks for, and shovels
//! traffic until killed.

use anyhow::{Context, Result};
use clap::Parser;
use loophole::config::{self, ClientConfig};
use loophole::supervisor;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Tunneling proxy client multiplexing loopback listeners over one
/// upstream connection
#[derive(Parser, Debug)]
#[command(name = "loophole")]
#[command(about = "Tunneling proxy client for loopback TCP/UDP listeners")]
#[command(version)]
struct Args {
    /// JSON metadata document sent to the server at handshake
    #[arg(short = 'j', long, value_name = "FILE")]
    json_metadata: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    debug: bool,

    /// Upstream tunnel server address
    #[arg(short, long, value_name = "HOST[:PORT]", default_value = config::DEFAULT_UPSTREAM)]
    connect: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.debug { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let metadata = config::load_metadata(args.json_metadata.as_deref())
        .context("failed to load metadata document")?;
    let client_config = ClientConfig {
        upstream: config::parse_upstream(&args.connect),
        metadata,
    };

    info!(
        version = loophole::VERSION,
        upstream = %client_config.upstream,
        "starting loophole client"
    );

    tokio::select! {
        _ = supervisor::run(client_config) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    Ok(())
}
