//! ws-dispatch — WebSocket service dispatch server
//!
//! Serves one or more WebSocket services, each resolved by its base path.
//! Every connection reassembles fragmented text, enforces its service's frame
//! size and idle timeout, and hands complete messages to the handler one at a
//! time. The bundled handler echoes each message back.
//!
//! Usage:
//!   ws-dispatch                              # Echo service at ws://127.0.0.1:7070/echo
//!   ws-dispatch --port 8080                  # Custom port
//!   ws-dispatch --services services.json     # Services from a config file

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use wsd_dispatch::{ServiceDescriptor, ServiceRegistry};
use wsd_protocol::{InboundMessage, OutboundMessage, ServiceConfig, ServicesFile};
use wsd_transport::{MessageHandler, Session, TransportConfig, TransportServer, UpgradeRequest};

#[derive(Parser, Debug)]
#[command(name = "ws-dispatch", about = "WebSocket service dispatch server")]
struct Cli {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, default_value = "7070")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    /// JSON file with the services to attach (`{ "services": [...] }`)
    #[arg(long)]
    services: Option<PathBuf>,

    /// Maximum concurrent connections
    #[arg(long, default_value = "32")]
    max_connections: usize,

    /// Largest reassembled message to accept, in bytes (each frame is still
    /// capped by its service's max frame size)
    #[arg(long)]
    max_message_size: Option<usize>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Enable permissive CORS on the HTTP routes
    #[arg(long)]
    cors: bool,

    /// Write logs to a file (defaults to ~/.ws-dispatch/logs/ws-dispatch.log if no path given)
    #[arg(long, default_missing_value = "DEFAULT", num_args = 0..=1)]
    log_file: Option<String>,
}

/// Sends every message straight back to its sender.
struct EchoHandler;

impl MessageHandler for EchoHandler {
    async fn on_message(&self, session: &Session, message: InboundMessage) -> Option<OutboundMessage> {
        debug!("Echoing {} bytes to {}", message.len(), session.id());
        Some(message.into())
    }

    async fn on_open(&self, session: &Session) {
        info!(
            "Session {} opened on {} (subprotocol: {:?})",
            session.id(),
            session.path(),
            session.subprotocol()
        );
    }

    async fn on_upgrade(
        &self,
        service: &ServiceDescriptor,
        request: &UpgradeRequest,
    ) -> Result<(), String> {
        info!(
            "Upgrade to {} accepted (offered subprotocols: {:?})",
            service.base_path(),
            request.subprotocols
        );
        Ok(())
    }
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let Some(log_file_arg) = cli.log_file.as_deref() else {
        if cli.json_logs {
            tracing_subscriber::fmt().json().with_env_filter(filter).init();
        } else {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
        return Ok(());
    };

    let log_path = if log_file_arg == "DEFAULT" {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".ws-dispatch/logs/ws-dispatch.log")
    } else {
        PathBuf::from(log_file_arg)
    };

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open log file {}", log_path.display()))?;
    let writer = std::sync::Mutex::new(file);

    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(writer)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
    }

    eprintln!("Logging to {}", log_path.display());
    Ok(())
}

/// Attach every configured service. Any invalid service aborts startup.
fn build_registry(services: Option<&PathBuf>) -> anyhow::Result<ServiceRegistry> {
    let configs = match services {
        Some(path) => {
            let file = ServicesFile::load(path)
                .with_context(|| format!("failed to load services from {}", path.display()))?;
            if file.services.is_empty() {
                anyhow::bail!("{} declares no services", path.display());
            }
            file.services
        }
        None => vec![ServiceConfig::new("echo")],
    };

    let registry = ServiceRegistry::new();
    for config in configs {
        let name = config.name.clone();
        registry
            .attach(config)
            .with_context(|| format!("failed to attach service '{name}'"))?;
    }
    Ok(registry)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let registry = Arc::new(build_registry(cli.services.as_ref())?);

    let transport_config = TransportConfig {
        port: cli.port,
        hostname: cli.hostname.clone(),
        enable_cors: cli.cors,
        max_connections: Some(cli.max_connections),
        verbose_logging: cli.verbose,
        max_message_size: cli.max_message_size,
    };

    let mut transport = TransportServer::start(transport_config, registry.clone(), EchoHandler)
        .await
        .map_err(|e| anyhow::anyhow!("failed to start transport: {e}"))?;
    let actual_port = transport.port();

    println!("────────────────────────────────────────────────────────────────");
    println!();
    println!("  Server running!");
    println!();
    println!("  WebSocket services:");
    for service in registry.services() {
        let subprotocols = service.subprotocols();
        if subprotocols.is_empty() {
            println!("    ws://{}:{}{}", cli.hostname, actual_port, service.base_path());
        } else {
            println!(
                "    ws://{}:{}{}  [{}]",
                cli.hostname,
                actual_port,
                service.base_path(),
                subprotocols.join(", ")
            );
        }
    }
    println!();
    println!("  Health check:");
    println!("    http://{}:{}/health", cli.hostname, actual_port);
    println!();
    println!("────────────────────────────────────────────────────────────────");
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    println!();
    println!("  Shutting down...");
    transport.stop().await;
    println!("  Server stopped.");
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(&cli) {
        eprintln!("{e:#}");
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}
