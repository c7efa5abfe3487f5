use scan_translate::{
    config::AppConfig,
    services::{
        broker::OCR_QUEUE, ocr::HttpTextRecognizer, segmentation::RowIntensitySegmenter,
    },
    workers::{ocr_stage::OcrStage, pool::WorkerPool, runtime},
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting OCR worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");
    runtime::install_metrics(&config).expect("Failed to start metrics exporter");

    tracing::info!("Connecting to Redis");
    let (broker, store) = runtime::connect(&config)
        .await
        .expect("Failed to connect to broker and status store");
    let storage = runtime::object_storage(&config).expect("Failed to initialize object storage");

    let recognizer = HttpTextRecognizer::new(config.ocr_endpoint.clone(), config.ocr_api_token.clone());
    let stage = OcrStage::new(
        store.clone(),
        broker.clone(),
        storage,
        Arc::new(RowIntensitySegmenter::default()),
        Arc::new(recognizer),
        config.segment_concurrency,
    );

    let pool = WorkerPool::new(
        OCR_QUEUE,
        config.consumer_name.clone(),
        config.worker_concurrency,
        broker,
        store,
        Arc::new(stage),
    )
    .with_poll_timeout(Duration::from_secs(config.poll_timeout_secs));

    tracing::info!(workers = config.worker_concurrency, "OCR worker ready");
    runtime::run_until_shutdown(pool, &config).await;
    tracing::info!("OCR worker stopped");
}
