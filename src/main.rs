//! dnslisten - echo DNS server
//!
//! Binds the configured UDP and TCP addresses, answers every query by
//! echoing it back as a response and shuts down gracefully on Ctrl-C.

mod cli;

use anyhow::Context;
use dnslisten::logging::{init_logging, LogConfig};
use dnslisten::server::{EchoHandler, Server, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_LISTEN: &str = "127.0.0.1:5353";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Some(args) = cli::parse_args() else {
        return Ok(());
    };

    let log = LogConfig {
        level: if args.verbose {
            "debug".to_string()
        } else {
            args.log_level.clone()
        },
        format: args.log_format.clone(),
        ..Default::default()
    };
    init_logging(&log)?;

    info!("dnslisten starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => {
            let yaml = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path))?;
            info!(path = %path, "Configuration loaded");
            ServerConfig::from_yaml(&yaml)?
        }
        None => ServerConfig::default(),
    };

    if let Some(listen) = &args.listen {
        let addr: SocketAddr = listen
            .parse()
            .with_context(|| format!("invalid listen address: {}", listen))?;
        config = config.with_udp_addr(addr).with_tcp_addr(addr);
    } else if config.udp_addr.is_none() && config.tcp_addr.is_none() {
        let addr: SocketAddr = DEFAULT_LISTEN.parse()?;
        config = config.with_udp_addr(addr).with_tcp_addr(addr);
    }

    let server = Server::new(config, Arc::new(EchoHandler));
    server.listen().await?;
    for (protocol, addr) in server.local_addrs() {
        info!(protocol = %protocol, addr = %addr, "Listening");
    }

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    if !server.shutdown_and_wait().await {
        warn!("Shutdown grace period elapsed with queries still in flight");
    }
    info!("dnslisten stopped");
    Ok(())
}
