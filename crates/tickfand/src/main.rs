//! tickfand: tick feed ingestion and WebSocket fan-out daemon.
//!
//! Connects to the upstream A-share quote feed, maintains the last-value
//! cache, and serves subscribers over WebSocket.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tickfan_core::{Config, Engine};
use tickfan_gateway::{app, GatewayState};

mod shutdown;

#[derive(Parser, Debug)]
#[command(name = "tickfand")]
#[command(about = "Tick feed ingestion and fan-out daemon")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    info!(
        upstream = %format!("{}:{}", config.upstream.host, config.upstream.port),
        ws = %config.ws.listen_addr,
        "loaded configuration"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown::shutdown_signal().await;
        shutdown_tx.send(true).ok();
    });

    let engine = Engine::new(config.clone());
    let state = GatewayState {
        cache: Arc::clone(engine.cache()),
        router: Arc::clone(engine.router()),
        drop_policy: config.router.drop_policy,
        ping_interval: Duration::from_secs(config.ws.ping_interval_secs),
    };
    let tasks = engine.start(shutdown_rx.clone());

    // Optional dedicated observability listener.
    let stats_task = match &config.stats {
        Some(stats) => {
            let listener = tokio::net::TcpListener::bind(&stats.listen_addr).await?;
            info!(addr = %stats.listen_addr, "stats server listening");
            let mut rx = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                let serve = axum::serve(listener, tickfan_gateway::server::stats_app())
                    .with_graceful_shutdown(async move {
                        rx.changed().await.ok();
                    });
                if let Err(e) = serve.await {
                    tracing::error!(error = %e, "stats server failed");
                }
            }))
        }
        None => None,
    };

    let listener = tokio::net::TcpListener::bind(&config.ws.listen_addr).await?;
    info!(addr = %config.ws.listen_addr, "websocket server listening");
    let mut rx = shutdown_rx;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            rx.changed().await.ok();
        })
        .await?;

    for task in tasks {
        task.await?;
    }
    if let Some(task) = stats_task {
        task.await?;
    }
    info!("tickfand stopped");
    Ok(())
}
