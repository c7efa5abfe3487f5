use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::services::broker::{BrokerError, MessageBroker, RedisBroker};
use crate::services::status_store::{RedisStatusStore, StatusStore, StoreError};
use crate::services::storage::{ObjectStorage, S3Storage, StorageError};
use crate::workers::backpressure::{BackpressureMonitor, SystemCpuSampler};
use crate::workers::pool::WorkerPool;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Invalid metrics address {0}")]
    MetricsAddr(String),

    #[error("Failed to install metrics exporter: {0}")]
    Metrics(String),
}

/// Broker and store for a worker process, both verified reachable.
pub async fn connect(
    config: &AppConfig,
) -> Result<(Arc<dyn MessageBroker>, Arc<dyn StatusStore>), StartupError> {
    let timeout = Duration::from_secs(config.broker_connect_timeout_secs);
    let broker = RedisBroker::connect(&config.redis_url, timeout).await?;

    let store = RedisStatusStore::connect(&config.redis_url, timeout).await?;

    let broker: Arc<dyn MessageBroker> = Arc::new(broker);
    let store: Arc<dyn StatusStore> = Arc::new(store);
    Ok((broker, store))
}

pub fn object_storage(config: &AppConfig) -> Result<Option<Arc<dyn ObjectStorage>>, StartupError> {
    match config.s3_settings() {
        Some(settings) => {
            let storage: Arc<dyn ObjectStorage> = Arc::new(S3Storage::new(&settings)?);
            Ok(Some(storage))
        }
        None => Ok(None),
    }
}

/// Serve worker metrics on `worker_metrics_addr` when configured.
pub fn install_metrics(config: &AppConfig) -> Result<(), StartupError> {
    let Some(addr) = config.worker_metrics_addr.as_deref() else {
        return Ok(());
    };
    let addr: SocketAddr = addr
        .parse()
        .map_err(|_| StartupError::MetricsAddr(addr.to_string()))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| StartupError::Metrics(e.to_string()))?;

    metrics::describe_counter!("jobs_completed_total", "Jobs that reached completed");
    metrics::describe_counter!("jobs_failed_total", "Jobs marked failed by a stage");
    metrics::describe_histogram!("stage_duration_seconds", "Time spent handling one message");
    metrics::describe_gauge!("worker_prefetch_limit", "Current unacknowledged-message ceiling");
    tracing::info!(%addr, "Worker metrics listening");
    Ok(())
}

/// Run a pool alongside its backpressure monitor until Ctrl-C.
pub async fn run_until_shutdown(pool: WorkerPool, config: &AppConfig) {
    let shutdown = CancellationToken::new();

    let monitor = BackpressureMonitor::new(
        pool.queue(),
        pool.prefetch(),
        Arc::new(SystemCpuSampler::new()),
        Duration::from_secs(config.backpressure_interval_secs),
    );
    let monitor = tokio::spawn(monitor.run(shutdown.clone()));
    let pool = tokio::spawn(Arc::new(pool).run(shutdown.clone()));

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received, finishing in-flight jobs"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
    }
    shutdown.cancel();

    if let Err(e) = pool.await {
        tracing::error!(error = %e, "Worker pool task failed");
    }
    if let Err(e) = monitor.await {
        tracing::error!(error = %e, "Backpressure monitor task failed");
    }
}
