use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use scan_translate::{
    app_state::AppState,
    config::AppConfig,
    middleware::rate_limit::RateLimiterRegistry,
    routes,
    services::{
        broker::{MessageBroker, RedisBroker},
        status_store::{RedisStatusStore, StatusStore},
        storage::{ObjectStorage, S3Storage},
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing scan-translate ingestion server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("jobs_submitted_total", "Jobs admitted into the pipeline");
    metrics::describe_counter!(
        "jobs_deduplicated_total",
        "Uploads answered with an existing job id"
    );
    metrics::describe_counter!(
        "rate_limited_requests_total",
        "Uploads rejected by the per-client rate limiter"
    );

    tracing::info!("Connecting to Redis");
    let connect_timeout = Duration::from_secs(config.broker_connect_timeout_secs);
    let broker = RedisBroker::connect(&config.redis_url, connect_timeout)
        .await
        .expect("Failed to connect to message broker");
    let store = RedisStatusStore::connect(&config.redis_url, connect_timeout)
        .await
        .expect("Status store is unreachable");

    let storage: Option<Arc<dyn ObjectStorage>> = config.s3_settings().map(|settings| {
        tracing::info!(bucket = %settings.bucket, "Initializing object storage client");
        Arc::new(S3Storage::new(&settings).expect("Failed to initialize object storage client"))
            as Arc<dyn ObjectStorage>
    });

    let broker: Arc<dyn MessageBroker> = Arc::new(broker);
    let store: Arc<dyn StatusStore> = Arc::new(store);
    let state = AppState::new(&config, store, broker, storage);

    let limiter = Arc::new(RateLimiterRegistry::new(
        config.rate_limit_per_second,
        config.rate_limit_burst,
        Duration::from_secs(config.rate_limit_idle_secs),
    ));

    let app = routes::api_router(state, limiter, config.max_upload_bytes)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes));

    tracing::info!("Starting scan-translate on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}
