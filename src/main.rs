use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flv_probe::{
    config::Config,
    probe::{sampler::build_http_client, Sampler},
    scheduler::{shutdown_channel, Scheduler},
    store::StreamStore,
    web::WebServer,
};

#[derive(Parser)]
#[command(name = "flv-probe")]
#[command(version)]
#[command(about = "Black-box quality probe and Prometheus exporter for HTTP-FLV live streams")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listen address for the exposition endpoint (overrides config file)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Log level
    #[arg(short = 'v', long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.probe.listen_addr = listen;
    }
    if let Some(log_level) = cli.log_level {
        config.probe.log_level = log_level;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("flv_probe={}", config.probe.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting flv-probe v{}", env!("CARGO_PKG_VERSION"));
    info!("configuration loaded from {}", cli.config);

    let store = StreamStore::new();
    for descriptor in config.stream_descriptors() {
        store.add_stream(descriptor).await;
    }
    info!(streams = store.len().await, "streams registered");

    let client = build_http_client().context("failed to build HTTP client")?;
    let sampler = Arc::new(Sampler::new(client, config.probe.clone()));

    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    let scheduler = Scheduler::new(
        store.clone(),
        sampler,
        config.probe.clone(),
        shutdown_rx.clone(),
    );
    tokio::spawn(scheduler.run());

    let web_server = WebServer::new(&config.probe.listen_addr, store)?;
    info!(addr = %web_server.addr(), "scrape endpoint at /metrics");

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        if shutdown_tx.send(true).is_err() {
            error!("shutdown receivers already gone");
        }
    });

    web_server.serve(shutdown_rx).await?;

    info!("stopped");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
