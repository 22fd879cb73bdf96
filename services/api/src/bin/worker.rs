//! services/api/src/bin/worker.rs
//!
//! Runs the pipeline workers: story generation, illustration, book
//! finalization and print fulfillment.

use api_lib::{
    adapters::DbAdapter,
    config::Config,
    error::ApiError,
    worker::{spawn_job_monitor, ApalisJobQueue, JobWorkerContext},
};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting workers...");

    let max_connections = (config.illustration_concurrency as u32 + 6).max(10);
    let db_pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(&config.database_url)
        .await?;
    let db_adapter = DbAdapter::new(db_pool.clone());
    db_adapter.run_migrations().await?;
    ApalisJobQueue::setup(&db_pool).await?;

    let queue = ApalisJobQueue::new(&db_pool);
    let context = JobWorkerContext::from_config(&config, db_adapter, queue)?;
    let monitor = spawn_job_monitor(&db_pool, context, &config)?;

    tokio::select! {
        result = monitor => {
            if let Err(err) = result {
                error!(error = %err, "job monitor task panicked");
                return Err(ApiError::Internal(err.to_string()));
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, stopping workers.");
        }
    }
    Ok(())
}
