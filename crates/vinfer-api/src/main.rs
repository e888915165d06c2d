//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};

use vinfer_api::{create_router, metrics, ApiConfig, AppState};
use vinfer_worker::{init_tracing, CacheSweeper, CommandPipeline, InferenceService, WorkerConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let logging = init_tracing();

    let result = run().await;
    if let Err(e) = &result {
        error!("vinfer-api failed: {:#}", e);
    }

    // Flush the log file before exiting.
    drop(logging);
    if result.is_err() {
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    info!("Starting vinfer-api");

    let config = ApiConfig::from_env();
    let worker_config = WorkerConfig::from_env();
    info!(
        host = %config.host,
        port = config.port,
        environment = %config.environment,
        "API config loaded"
    );

    let pipeline = CommandPipeline::from_config(&worker_config)?
        .context("PIPELINE_COMMAND must name the inference program")?;
    let service = InferenceService::from_config(&worker_config, Arc::new(pipeline))?
        .with_max_video_size(config.max_body_size.min(worker_config.max_video_size));
    service
        .check_storage()
        .await
        .context("Storage directories are not writable")?;

    let metrics_handle = if config.metrics_enabled {
        match metrics::init_metrics() {
            Ok(handle) => {
                info!("Prometheus metrics enabled at /metrics");
                Some(handle)
            }
            Err(e) => {
                warn!("Failed to install Prometheus recorder: {}", e);
                None
            }
        }
    } else {
        None
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = CacheSweeper::new(service.store().clone(), worker_config.sweep_interval);
    let sweeper_task = tokio::spawn(async move {
        sweeper.run(shutdown_rx).await;
    });

    let state = AppState::new(config.clone(), service);
    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid bind address")?;

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper_task.await {
        warn!("Cache sweeper task ended abnormally: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install CTRL+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
