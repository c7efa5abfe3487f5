use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::models::job::{Job, JobStatus};
use crate::services::pdf::{Margins, PdfRenderer};
use crate::services::status_store::StatusStore;
use crate::services::storage::{ObjectStorage, StorageError};
use crate::services::translation::Translator;
use crate::workers::pool::StageHandler;
use crate::workers::{blocking, HandleError, StageError};

/// Languages a deployment translates between.
#[derive(Debug, Clone)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

/// Second stage: translate, render the PDF, store it, record completion.
///
/// Re-running a job overwrites the same artifact; the completion write is a
/// no-op once the job is terminal, so counters move once per job.
pub struct RenderStage {
    store: Arc<dyn StatusStore>,
    storage: Option<Arc<dyn ObjectStorage>>,
    translator: Arc<dyn Translator>,
    renderer: Arc<dyn PdfRenderer>,
    languages: LanguagePair,
    margins: Margins,
    output_dir: PathBuf,
}

impl RenderStage {
    pub fn new(
        store: Arc<dyn StatusStore>,
        storage: Option<Arc<dyn ObjectStorage>>,
        translator: Arc<dyn Translator>,
        renderer: Arc<dyn PdfRenderer>,
        languages: LanguagePair,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            storage,
            translator,
            renderer,
            languages,
            margins: Margins::default(),
            output_dir: output_dir.into(),
        }
    }

    async fn render(&self, text: &str) -> Result<Vec<u8>, StageError> {
        let renderer = self.renderer.clone();
        let margins = self.margins;
        let text = text.to_string();
        blocking(move || Ok(renderer.render(&text, &margins)?)).await
    }

    /// Upload to the job's presigned URL, or write `<output_dir>/<job_id>.pdf`.
    async fn store_artifact(&self, job: &Job, pdf: Vec<u8>) -> Result<String, StageError> {
        if job.uses_remote_output() {
            let storage = self.storage.as_ref().ok_or_else(|| {
                StorageError::Config("job references object storage but none is configured".into())
            })?;
            storage.stream_put(&job.pdf_upload_url, pdf).await?;
            return Ok(format!("{}.pdf", job.job_id));
        }

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.output_dir.join(format!("{}.pdf", job.job_id));
        write_atomically(&path, &pdf).await?;
        Ok(path.to_string_lossy().into_owned())
    }
}

/// Write via a sibling temp file so readers never see a partial PDF.
async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("pdf.part");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

#[async_trait]
impl StageHandler for RenderStage {
    fn stage(&self) -> &'static str {
        "render"
    }

    async fn handle(&self, mut job: Job) -> Result<(), HandleError> {
        self.store
            .set_status(&job.job_id, JobStatus::TranslationInProgress)
            .await?;

        job.translated_text = self
            .translator
            .translate(&job.extracted_text, &self.languages.source, &self.languages.target)
            .await
            .map_err(StageError::from)?;

        let pdf = self.render(&job.translated_text).await?;
        job.output_path = self.store_artifact(&job, pdf).await?;

        let response_time = job.complete();
        if self.store.complete(&job.job_id, response_time).await? {
            metrics::counter!("jobs_completed_total").increment(1);
            tracing::info!(
                job_id = %job.job_id,
                output = %job.output_path,
                response_time_ms = response_time.as_millis() as u64,
                "Job completed"
            );
        } else {
            tracing::info!(job_id = %job.job_id, "Job already terminal, completion skipped");
        }
        Ok(())
    }
}
