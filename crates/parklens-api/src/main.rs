//! Axum API server binary.

use std::net::SocketAddr;

use anyhow::Context;
use parklens_storage::StorageConfig;
use parklens_worker::WorkerConfig;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use parklens_api::{create_router, metrics, ApiConfig, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rustls 0.23+)
    let _ = rustls::crypto::ring::default_provider().install_default();

    init_tracing();
    info!("Starting parklens-api");

    // Load configuration
    let config = ApiConfig::from_env();
    let worker = WorkerConfig::from_env();
    let storage = StorageConfig::from_env().context("invalid storage configuration")?;
    info!(
        "API config: host={}, port={}, runner={:?}, task_store={:?}, storage={:?}",
        config.host, config.port, worker.runner_mode, worker.task_store, storage.backend
    );

    if config.is_production() && config.cors_origins.iter().any(|o| o == "*") {
        warn!("CORS allows any origin in production");
    }

    let task_ttl = worker.task_ttl;
    let sweep_interval = worker.sweep_interval;
    let shutdown_timeout = worker.shutdown_timeout;

    // Create application state
    let state = match AppState::new(config.clone(), worker, storage).await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create application state: {}", e);
            std::process::exit(1);
        }
    };
    let executor = state.executor.clone();

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

    // Finished task records are kept forever unless a TTL is configured
    let sweeper = task_ttl.map(|ttl| {
        info!("Evicting finished tasks after {:?}", ttl);
        executor.start_sweeper(ttl, sweep_interval)
    });

    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.host, config.port))?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    if !executor.shutdown(shutdown_timeout).await {
        warn!("Some tasks were still running at exit");
    }
    if let Some(handle) = sweeper {
        let _ = handle.await;
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("parklens_api=info,parklens_worker=info,parklens_storage=info,tower_http=info")
    });

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
