//! redfish-mcp binary: load configuration, start discovery, serve MCP on stdio.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use redfish_mcp::config::{self, Cli, McpTransport};
use redfish_mcp::discovery::SsdpDiscovery;
use redfish_mcp::hosts::{self, HostRegistry};
use redfish_mcp::mcp;
use tracing::{info, info_span};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let config = match config::load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("redfish-mcp: configuration error: {e}");
            std::process::exit(1);
        }
    };

    // RUST_LOG overrides the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.mcp.log_level.as_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if config.mcp.transport != McpTransport::Stdio {
        eprintln!(
            "redfish-mcp: unsupported transport: {}",
            config.mcp.transport
        );
        std::process::exit(1);
    }

    let redfish = config.redfish;
    let registry = Arc::new(HostRegistry::new(
        redfish.hosts.clone(),
        redfish.client_defaults(),
        info_span!("hosts"),
    ));

    info!(
        hosts = redfish.hosts.len(),
        port = redfish.port,
        auth_method = %redfish.auth_method,
        discovery = redfish.discovery_enabled,
        "redfish-mcp starting"
    );

    let discovery_task = redfish.discovery_enabled.then(|| {
        let engine = SsdpDiscovery::new(
            Duration::from_secs(redfish.discovery_timeout),
            info_span!("discovery"),
        );
        hosts::spawn_discovery(
            Arc::clone(&registry),
            engine,
            Duration::from_secs(redfish.discovery_interval),
        )
    });

    tokio::select! {
        () = mcp::run_stdio(Arc::clone(&registry)) => info!("stdin closed, shutting down"),
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
    }

    if let Some(task) = discovery_task {
        task.abort();
    }
}
