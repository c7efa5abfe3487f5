use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{
    broker::MessageBroker,
    ingestion::IngestionService,
    status_store::StatusStore,
    storage::ObjectStorage,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StatusStore>,
    pub broker: Arc<dyn MessageBroker>,
    pub storage: Option<Arc<dyn ObjectStorage>>,
    pub ingestion: Arc<IngestionService>,
    pub output_dir: PathBuf,
    pub presign_ttl_secs: u32,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn StatusStore>,
        broker: Arc<dyn MessageBroker>,
        storage: Option<Arc<dyn ObjectStorage>>,
    ) -> Self {
        let ingestion = IngestionService::new(config, store.clone(), broker.clone(), storage.clone());
        Self {
            store,
            broker,
            storage,
            ingestion: Arc::new(ingestion),
            output_dir: PathBuf::from(&config.output_dir),
            presign_ttl_secs: config.presign_ttl_secs,
        }
    }
}
