//! Outreach - task execution engine entry point

use anyhow::{Context, Result};
use outreach_api::AppState;
use outreach_common::config::{Config, LoggingConfig};
use outreach_core::{
    EngineMetrics, ExecutionEngine, HttpPlatformClient, MaintenanceRunner,
    PassthroughCredentialStore, StatsAggregator, TaskController, WorkerPool,
};
use outreach_storage::repository::Repositories;
use outreach_storage::{DatabasePool, MemoryStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config_path = std::env::var_os("OUTREACH_CONFIG").map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    config.validate()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting Outreach task engine...");

    // Initialize storage
    let (repos, db_pool) = match config.database.backend.as_str() {
        "memory" => {
            warn!("Using the in-memory backend; nothing survives a restart");
            (Repositories::memory(Arc::new(MemoryStore::new())), None)
        }
        _ => {
            let db_pool = DatabasePool::new(&config.database).await?;
            db_pool.migrate().await?;
            (Repositories::postgres(db_pool.clone()), Some(db_pool))
        }
    };

    // Initialize the engine
    let metrics = EngineMetrics::new()?;
    let stats = StatsAggregator::new(repos.targets.clone(), repos.logs.clone());
    let platform = Arc::new(HttpPlatformClient::new(&config.platform)?);
    let engine = Arc::new(ExecutionEngine::new(
        &repos,
        stats.clone(),
        platform,
        Arc::new(PassthroughCredentialStore),
        metrics.clone(),
        &config,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start workers
    let worker_pool = Arc::new(WorkerPool::new(
        engine.clone(),
        repos.tasks.clone(),
        config.worker.clone(),
    ));
    let worker_handles = worker_pool.spawn(shutdown_rx.clone());

    // Start maintenance
    let maintenance_handle = {
        let runner = MaintenanceRunner::new(
            engine.clone(),
            repos.tasks.clone(),
            config.worker.clone(),
        );
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { runner.run(shutdown).await })
    };

    // Start API server
    let state = AppState {
        controller: Arc::new(TaskController::new(
            repos.tasks.clone(),
            repos.targets.clone(),
            stats.hub().clone(),
        )),
        stats,
        logs: repos.logs.clone(),
        metrics,
        db_pool,
    };
    let listener = tokio::net::TcpListener::bind(&config.api.bind)
        .await
        .with_context(|| format!("Failed to bind API server to {}", config.api.bind))?;
    info!("Starting API server on {}", config.api.bind);
    let api_handle = {
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = outreach_api::create_router(state);
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                // A dropped sender means shutdown as well
                shutdown.wait_for(|stop| *stop).await.ok();
            });
            if let Err(e) = serve.await {
                error!("API server error: {}", e);
            }
        })
    };

    info!("Outreach started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Workers finish their in-flight step before exiting
    if shutdown_tx.send(true).is_err() {
        warn!("Every background loop had already exited before shutdown");
    }
    for handle in worker_handles {
        if let Err(e) = handle.await {
            error!("Worker terminated abnormally: {}", e);
        }
    }
    if let Err(e) = maintenance_handle.await {
        error!("Maintenance runner terminated abnormally: {}", e);
    }
    if let Err(e) = api_handle.await {
        error!("API server terminated abnormally: {}", e);
    }

    info!("Outreach shutdown complete");

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},outreach=debug", config.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
