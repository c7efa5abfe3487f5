use scan_translate::{
    config::AppConfig,
    services::{broker::TRANSLATION_QUEUE, pdf::PrintPdfRenderer, translation::HttpTranslator},
    workers::{
        pool::WorkerPool,
        render_stage::{LanguagePair, RenderStage},
        runtime,
    },
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

    tracing::info!("Starting translation and render worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");
    runtime::install_metrics(&config).expect("Failed to start metrics exporter");

    tracing::info!("Connecting to Redis");
    let (broker, store) = runtime::connect(&config)
        .await
        .expect("Failed to connect to broker and status store");
    let storage = runtime::object_storage(&config).expect("Failed to initialize object storage");

    let renderer = match &config.pdf_font_path {
        Some(path) => {
            let font = std::fs::read(path).expect("Failed to read PDF font");
            PrintPdfRenderer::with_font(font)
        }
        None => PrintPdfRenderer::new(),
    };

    let stage = RenderStage::new(
        store.clone(),
        storage,
        Arc::new(HttpTranslator::new(config.translate_endpoint.clone())),
        Arc::new(renderer),
        LanguagePair {
            source: config.source_lang.clone(),
            target: config.target_lang.clone(),
        },
        config.output_dir.clone(),
    );

    let pool = WorkerPool::new(
        TRANSLATION_QUEUE,
        config.consumer_name.clone(),
        config.worker_concurrency,
        broker,
        store,
        Arc::new(stage),
    )
    .with_poll_timeout(Duration::from_secs(config.poll_timeout_secs));

    tracing::info!(workers = config.worker_concurrency, "Render worker ready");
    runtime::run_until_shutdown(pool, &config).await;
    tracing::info!("Render worker stopped");
}
