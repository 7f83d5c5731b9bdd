//! Transfer parser CLI.
//!
//! ```text
//! parser-client get-block [--url <host:port>]
//! ```

use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser as _, Subcommand};
use tracing::debug;

use transfer_parser::logging;
use transfer_parser::server::{BlockResponse, ErrorBody};

/// Server queried when no --url is given
const DEFAULT_SERVER_URL: &str = "localhost:8888";

#[derive(clap::Parser)]
#[command(name = "parser-client", about = "Query a running transfer parser server", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Get the current block
    #[command(name = "get-block")]
    GetBlock {
        /// Parser server URL
        #[arg(short, long, env = "PARSER_SERVER_URL", default_value = DEFAULT_SERVER_URL)]
        url: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_with_default("warn");

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[ERROR] {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::GetBlock { url } => {
            let block = get_block(&url).await?;
            println!("{}", block.id);
        }
    }
    Ok(())
}

async fn get_block(url: &str) -> Result<BlockResponse> {
    if url.trim().is_empty() {
        bail!("--url flag required");
    }
    let endpoint = block_url(url);
    debug!(%endpoint, "Requesting current block");

    let response = reqwest::get(&endpoint)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.message)
            .unwrap_or(text);
        bail!("server error {status}: {message}");
    }

    response
        .json::<BlockResponse>()
        .await
        .context("invalid response from server")
}

/// Accepts `host:port` or a full http(s) URL
fn block_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.starts_with("http://") || url.starts_with("https://") {
        format!("{url}/block")
    } else {
        format!("http://{url}/block")
    }
}
