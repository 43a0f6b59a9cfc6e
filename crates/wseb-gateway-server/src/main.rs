//! WSEB gateway binary.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wseb_gateway_server::{GatewayConfig, GatewayServer};

#[derive(Parser)]
#[command(name = "wseb-gateway")]
#[command(about = "WebSocket emulation gateway")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, env = "WSEB_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding the config file
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Print the default configuration and exit
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.print_default_config {
        print!("{}", GatewayConfig::default().to_toml()?);
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config = config.with_bind_addr(bind);
    }
    config.validate()?;

    info!(addr = %config.bind_addr, "Starting WSEB gateway");
    for service in &config.services {
        info!(path = %service.path, handler = ?service.handler, "Service configured");
    }

    let server = GatewayServer::new(config);
    server
        .serve_with_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    Ok(())
}
