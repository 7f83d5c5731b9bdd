//! Transfer parser HTTP server.
//!
//! Connects to a node, subscribes the `--watch` addresses and serves the
//! query API until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser as _;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use transfer_parser::filter::parse_address;
use transfer_parser::logging;
use transfer_parser::server::{self, DEFAULT_HOST, DEFAULT_PORT};
use transfer_parser::source::{
    NodeLogSource, SourceConfig, CONNECTION_TIMEOUT_MS, DEFAULT_CHANNEL_CAPACITY, DEFAULT_ENDPOINT,
};
use transfer_parser::Parser;

#[derive(clap::Parser, Debug)]
#[command(name = "parser-server", about = "Serve ERC-20 Transfer queries for watched addresses", version)]
struct Args {
    /// Hostname on which the server will listen
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Port on which the server will listen
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Node WebSocket URL or IPC socket path
    #[arg(long, env = "PARSER_NODE_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Connect + subscribe timeout in milliseconds
    #[arg(long, env = "PARSER_CONNECT_TIMEOUT_MS", default_value_t = CONNECTION_TIMEOUT_MS)]
    connect_timeout_ms: u64,

    /// Address to subscribe at startup (repeatable)
    #[arg(long = "watch")]
    watch: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    let source = NodeLogSource::new(SourceConfig {
        endpoint: args.endpoint.clone(),
        timeout_ms: args.connect_timeout_ms,
        channel_capacity: DEFAULT_CHANNEL_CAPACITY,
    });
    info!(endpoint = %source.endpoint(), "Using node endpoint");
    let parser = Arc::new(Parser::new(Arc::new(source)));

    for raw in &args.watch {
        let address = parse_address(raw).with_context(|| format!("invalid --watch address {raw}"))?;
        if !parser.subscribe(address).await {
            warn!(%address, endpoint = %args.endpoint, "Startup subscription failed");
        }
    }

    let listener = TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to listen {}:{}", args.host, args.port))?;
    info!(addr = %listener.local_addr()?, "server listening");

    server::serve(listener, Arc::clone(&parser), shutdown_signal())
        .await
        .context("failed to run server")?;

    parser.shutdown().await;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
}
