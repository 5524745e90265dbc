//! `semem` — command-line client for a Semem MCP server.
//!
//! Spawns the configured server process, speaks JSON-RPC over its stdio,
//! and exposes the discovered tools through an interactive REPL, a batch
//! demo runner, and one-shot subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use semem_client::{ClientConfig, Session};

mod batch;
mod repl;
mod tools;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CLI definition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Semem — semantic memory MCP client.
#[derive(Debug, Parser)]
#[command(name = "semem", version, about)]
struct Cli {
    /// Path to the config file.
    #[arg(long, default_value = "semem.toml")]
    config: PathBuf,

    /// Server command to spawn, overriding the config file
    /// (e.g. `--server "node mcp/index.js"`).
    #[arg(long)]
    server: Option<String>,

    /// Per-call timeout in milliseconds (default 30000).
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Connect retry budget for transport failures (default 3).
    #[arg(long)]
    retries: Option<u32>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive command loop (default when no subcommand is given).
    Repl,
    /// Run the fixed demo sequence and exit; halts on the first failure.
    Batch,
    /// Print the discovered tool catalog.
    Tools,
    /// Call a single tool and print the result as JSON.
    Call {
        /// Tool name from the catalog.
        tool: String,
        /// Tool arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Read a resource by URI (e.g. `semem://status`).
    Read {
        uri: String,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    match cli.command.unwrap_or(Command::Repl) {
        Command::Repl => repl::run(&config).await,
        Command::Batch => batch::run(&config).await,
        Command::Tools => {
            let session = Session::connect(&config).await?;
            for tool in session.tools() {
                println!("{:<32} {}", tool.name, tool.description);
            }
            session.close().await;
            Ok(())
        }
        Command::Call { tool, args } => {
            let arguments: serde_json::Value = serde_json::from_str(&args)
                .map_err(|e| anyhow::anyhow!("--args is not valid JSON: {e}"))?;
            let session = Session::connect(&config).await?;
            let result = session.call_tool(&tool, arguments).await;
            session.close().await;
            println!("{}", serde_json::to_string_pretty(&result?)?);
            Ok(())
        }
        Command::Read { uri } => {
            let session = Session::connect(&config).await?;
            let result = session.read_resource(&uri).await;
            session.close().await;
            for content in result?.contents {
                match content.text {
                    Some(text) => println!("{text}"),
                    None => println!("({} bytes of binary content)", content.blob.map(|b| b.len()).unwrap_or(0)),
                }
            }
            Ok(())
        }
    }
}

/// Logging goes to stderr so stdout stays clean for results.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Config file first, CLI flags on top.
fn resolve_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let mut config = ClientConfig::load_or_default(&cli.config)?;

    if let Some(server) = &cli.server {
        let mut parts = server.split_whitespace().map(str::to_string);
        config.server.command = parts.next().unwrap_or_default();
        config.server.args = parts.collect();
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if let Some(retries) = cli.retries {
        config.retries = retries;
    }
    Ok(config)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
