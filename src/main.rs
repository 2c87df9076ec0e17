//! OAuth2 proxy binary.
//!
//! # Architecture Overview
//!
//! ```text
//! Browser ──▶ server ──▶ Session ─▶ CsrfToken ─▶ Authorization ─▶ ProxyData ──▶ API
//! Browser ◀── dispatch ◀ Session ◀─ CsrfToken ◀─ Authorization ◀─ ProxyData ◀── API
//!
//! Background: app token refresher, session gc / health check / statistics
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use oauth2_proxy::config::{load_config, ProxyConfig};
use oauth2_proxy::http::HttpServer;
use oauth2_proxy::lifecycle::{signals, spawn_background_tasks, Services, Shutdown};
use oauth2_proxy::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "oauth2-proxy", version, about = "OAuth2 credential-injecting reverse proxy")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listener port, overriding the configured one.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }

    logging::init_logging(&config.observability.log_level);
    tracing::info!("oauth2-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        api_url = %config.api_url,
        bind_address = %config.bind_address(),
        session_driver = ?config.session.driver,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(config.bind_address()).await?;

    let services = Services::build(config).await?;
    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());
    spawn_background_tasks(&services, &shutdown);

    let server = HttpServer::new(services)?;
    server.run(listener, shutdown.subscribe()).await?;

    shutdown.trigger();
    tracing::info!("Shutdown complete");
    Ok(())
}
