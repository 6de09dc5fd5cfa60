//! Mycelium node - a standalone platform process
//!
//! Usage:
//!   mycelium-node --config config/node.toml
//!   mycelium-node --distributed --port 4242 --peer 10.0.0.7:4242 --alias lab
//!
//! Registers an `echo` entity (also offering the `echo` capability) so peers
//! can exercise routing against the node, then runs until Ctrl-C.

use actors::{entity, Platform};
use anyhow::{Context, Result};
use clap::Parser;
use config::RuntimeConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "mycelium-node")]
#[command(about = "Mycelium message-passing platform node")]
#[command(version)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable the network layer regardless of the configuration file
    #[arg(long)]
    distributed: bool,

    /// TCP listen port override
    #[arg(short, long)]
    port: Option<u16>,

    /// Peer to run the propagation handshake with, as host:port
    #[arg(long)]
    peer: Vec<String>,

    /// Alias registered for the first peer
    #[arg(long)]
    alias: Option<String>,

    /// Handshake timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    handshake_timeout_ms: u64,
}

fn build_config(args: &Args) -> Result<RuntimeConfig> {
    let mut config = RuntimeConfig::load(args.config.as_deref())
        .with_context(|| format!("Failed to load configuration from {:?}", args.config))?;
    if args.distributed || !args.peer.is_empty() {
        config.network.distributed = true;
    }
    if let Some(port) = args.port {
        config.network.listen_port = port;
    }
    Ok(config)
}

fn parse_peer(peer: &str) -> Result<(&str, u16)> {
    let (host, port) = peer
        .rsplit_once(':')
        .with_context(|| format!("Peer '{}' is not host:port", peer))?;
    let port = port
        .parse()
        .with_context(|| format!("Invalid port in peer '{}'", peer))?;
    Ok((host, port))
}

fn register_echo(platform: &Platform) -> Result<()> {
    platform.register(
        "echo",
        entity::from_fn(|env, ctx| {
            ctx.reply(env, env.payload.clone().unwrap_or_default())?;
            Ok(())
        }),
    )?;
    platform.subscribe_capability("echo", "echo")?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = build_config(&args)?;
    config::init_logging(&config.logging);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Mycelium node");

    let platform = Platform::start(config).map_err(|e| {
        error!(error = %e, category = e.category(), "Platform failed to start");
        e
    })?;
    register_echo(&platform)?;

    let timeout = Duration::from_millis(args.handshake_timeout_ms);
    for (index, peer) in args.peer.iter().enumerate() {
        let (host, port) = parse_peer(peer)?;
        let alias = if index == 0 { args.alias.as_deref() } else { None };
        match platform.connect(host, port, alias, timeout) {
            Ok(node) => info!(node = %node, alias = ?alias, "Connected to peer"),
            Err(e) => warn!(peer = %peer, error = %e, "Peer handshake failed"),
        }
    }

    info!(
        platform_id = %platform.platform_id(),
        node = ?platform.local_node(),
        "Node running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install Ctrl-C handler")?;
    info!("Shutdown signal received");

    platform.shutdown();
    let stats = platform.stats();
    info!(
        delivered = stats.delivered,
        handler_failures = stats.handler_failures,
        dropped = stats.dropped,
        "Node stopped"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_peer() {
        assert_eq!(parse_peer("10.0.0.7:4100").unwrap(), ("10.0.0.7", 4100));
        assert_eq!(parse_peer("lab.local:80").unwrap(), ("lab.local", 80));
        assert!(parse_peer("lab.local").is_err());
        assert!(parse_peer("lab:port").is_err());
    }

    #[test]
    fn test_peer_implies_distributed() {
        let args = Args::parse_from(["mycelium-node", "--peer", "127.0.0.1:4100", "-p", "4200"]);
        let config = build_config(&args).unwrap();
        assert!(config.network.distributed);
        assert_eq!(config.network.listen_port, 4200);
    }
}
