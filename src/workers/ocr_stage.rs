use async_trait::async_trait;
use std::sync::Arc;

use crate::models::job::{Job, JobStatus};
use crate::services::broker::{MessageBroker, TRANSLATION_QUEUE};
use crate::services::ocr::{extract_text, TextRecognizer};
use crate::services::segmentation::Segmenter;
use crate::services::status_store::StatusStore;
use crate::services::storage::{ObjectStorage, StorageError};
use crate::workers::pool::StageHandler;
use crate::workers::{blocking, HandleError, StageError};

/// First stage: image → segments → text, then hand off to `translation-queue`.
pub struct OcrStage {
    store: Arc<dyn StatusStore>,
    broker: Arc<dyn MessageBroker>,
    storage: Option<Arc<dyn ObjectStorage>>,
    segmenter: Arc<dyn Segmenter>,
    recognizer: Arc<dyn TextRecognizer>,
    segment_concurrency: usize,
}

impl OcrStage {
    pub fn new(
        store: Arc<dyn StatusStore>,
        broker: Arc<dyn MessageBroker>,
        storage: Option<Arc<dyn ObjectStorage>>,
        segmenter: Arc<dyn Segmenter>,
        recognizer: Arc<dyn TextRecognizer>,
        segment_concurrency: usize,
    ) -> Self {
        Self {
            store,
            broker,
            storage,
            segmenter,
            recognizer,
            segment_concurrency,
        }
    }

    async fn load_image(&self, job: &Job) -> Result<Vec<u8>, StageError> {
        if job.uses_remote_image() {
            let storage = self.storage.as_ref().ok_or_else(|| {
                StorageError::Config("job references object storage but none is configured".into())
            })?;
            return Ok(storage.stream_get(&job.image_download_url).await?);
        }
        Ok(tokio::fs::read(&job.image_path).await?)
    }

    async fn recognize(&self, job: &Job) -> Result<String, StageError> {
        let image = self.load_image(job).await?;

        let segmenter = self.segmenter.clone();
        let segments = blocking(move || Ok(segmenter.segment(&image)?)).await?;
        tracing::debug!(job_id = %job.job_id, segments = segments.len(), "Image segmented");

        Ok(extract_text(self.recognizer.clone(), segments, self.segment_concurrency).await?)
    }
}

#[async_trait]
impl StageHandler for OcrStage {
    fn stage(&self) -> &'static str {
        "ocr"
    }

    async fn handle(&self, mut job: Job) -> Result<(), HandleError> {
        self.store.set_status(&job.job_id, JobStatus::OcrInProgress).await?;

        job.extracted_text = self.recognize(&job).await?;

        // Ack of the ocr-queue message waits on this publish; a crash in
        // between redelivers and republishes, which the next stage tolerates.
        let payload = serde_json::to_string(&job).map_err(StageError::from)?;
        self.broker.publish(TRANSLATION_QUEUE, &payload).await?;

        tracing::info!(
            job_id = %job.job_id,
            chars = job.extracted_text.len(),
            "Text extracted, job handed to translation"
        );
        Ok(())
    }
}
