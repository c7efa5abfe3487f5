//! Worker pools for the two pipeline stages.
//!
//! Each stage consumes one queue through a [`pool::WorkerPool`]. A
//! [`pool::StageHandler`] processes one job; its error decides what happens to
//! the message: a [`HandleError::Stage`] is permanent (job marked `failed`,
//! message acknowledged) while broker or store errors are transient (message
//! handed back for redelivery).

pub mod backpressure;
pub mod ocr_stage;
pub mod pool;
pub mod render_stage;
pub mod runtime;

use crate::services::broker::BrokerError;
use crate::services::ocr::OcrError;
use crate::services::pdf::RenderError;
use crate::services::segmentation::SegmentationError;
use crate::services::status_store::StoreError;
use crate::services::storage::StorageError;
use crate::services::translation::TranslateError;

/// Unrecoverable failure of one job inside a stage.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("Failed to read input image: {0}")]
    ImageRead(#[from] std::io::Error),

    #[error("Failed to transfer object: {0}")]
    Storage(#[from] StorageError),

    #[error("Segmentation failed: {0}")]
    Segmentation(#[from] SegmentationError),

    #[error("Text recognition failed: {0}")]
    Recognition(#[from] OcrError),

    #[error("Translation failed: {0}")]
    Translation(#[from] TranslateError),

    #[error("PDF rendering failed: {0}")]
    Rendering(#[from] RenderError),

    #[error("Failed to serialize job: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Blocking task failed: {0}")]
    Task(String),
}

/// Outcome of handling one message that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("Broker unavailable: {0}")]
    Broker(#[from] BrokerError),

    #[error("Status store unavailable: {0}")]
    Store(#[from] StoreError),
}

impl HandleError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, HandleError::Stage(_))
    }
}

/// Run CPU-bound collaborator work off the async executor.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, StageError>
where
    F: FnOnce() -> Result<T, StageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StageError::Task(e.to_string()))?
}
