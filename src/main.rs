use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gatehouse::config::GatehouseConfig;
use gatehouse::http::{HttpServer, Upstream};
use gatehouse::ratelimit::{RateLimiter, Sweeper};

#[derive(Parser, Debug)]
#[command(name = "gatehouse", version)]
#[command(about = "Per-client rate limiting gate for HTTP backends")]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen address, overriding the configuration
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);
    match args.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }

    info!("Starting Gatehouse Rate Limiting Gate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = GatehouseConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.http_addr {
        config.server.http_addr = addr;
    }
    let limits = config.rate_limiting.limit_config();
    info!(
        http_addr = %config.server.http_addr,
        max_requests = limits.limit,
        window_secs = limits.window.as_secs(),
        idle_retention_secs = limits.idle_retention.as_secs(),
        forwarded_for = ?config.rate_limiting.forwarded_for,
        "Configuration loaded"
    );

    let rate_limiter = Arc::new(RateLimiter::new(limits));
    let sweeper = Sweeper::start(
        Arc::clone(&rate_limiter),
        config.rate_limiting.sweep_interval(),
    );

    let upstream = Upstream::from_config(&config.upstream)?;
    let server = HttpServer::new(
        config.server.http_addr,
        rate_limiter,
        config.rate_limiting.forwarded_policy(),
    )
    .with_upstream(upstream);

    // Run the server with graceful shutdown on Ctrl+C
    let served = server.serve_with_shutdown(shutdown_signal()).await;

    sweeper.stop().await?;
    served?;

    info!("Gatehouse stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
