use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{AppConfig, JobIdMode, StagingMode};
use crate::models::job::{Job, JobStatus};
use crate::services::broker::{BrokerError, MessageBroker, OCR_QUEUE};
use crate::services::status_store::{StatusStore, StoreError};
use crate::services::storage::{ObjectStorage, StorageError};

/// One uploaded file as received from the client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Outcome of a successful admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// A new job entered the pipeline.
    Created(String),
    /// Identical content was already submitted; nothing was enqueued.
    Existing(String),
}

impl Admission {
    pub fn job_id(&self) -> &str {
        match self {
            Admission::Created(id) | Admission::Existing(id) => id,
        }
    }
}

/// Object key of a job's rendered PDF.
pub fn output_key(filename: &str) -> String {
    format!("output/{filename}")
}

/// Hex SHA-256 of the uploaded bytes.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Admits uploads into the pipeline.
///
/// Admission is all-or-nothing from the caller's view: the job is staged,
/// published to `ocr-queue`, and only then recorded as `submitted`. A failure
/// at any step returns an error and leaves no status behind (the status write
/// is the last step, so a publish failure never leaves a dangling entry).
pub struct IngestionService {
    store: Arc<dyn StatusStore>,
    broker: Arc<dyn MessageBroker>,
    storage: Option<Arc<dyn ObjectStorage>>,
    job_id_mode: JobIdMode,
    staging_mode: StagingMode,
    uploads_dir: PathBuf,
    presign_ttl_secs: u32,
}

impl IngestionService {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn StatusStore>,
        broker: Arc<dyn MessageBroker>,
        storage: Option<Arc<dyn ObjectStorage>>,
    ) -> Self {
        Self {
            store,
            broker,
            storage,
            job_id_mode: config.job_id_mode,
            staging_mode: config.staging_mode,
            uploads_dir: PathBuf::from(&config.uploads_dir),
            presign_ttl_secs: config.presign_ttl_secs,
        }
    }

    pub async fn admit(&self, upload: Upload) -> Result<Admission, AdmissionError> {
        if upload.bytes.is_empty() {
            return Err(AdmissionError::EmptyUpload);
        }
        image::guess_format(&upload.bytes).map_err(|_| AdmissionError::UnsupportedImage)?;

        let job_id = match self.job_id_mode {
            JobIdMode::Fingerprint => {
                let id = fingerprint(&upload.bytes);
                if self.store.get_status(&id).await?.is_some() {
                    metrics::counter!("jobs_deduplicated_total").increment(1);
                    tracing::info!(job_id = %id, "Identical upload already admitted");
                    return Ok(Admission::Existing(id));
                }
                id
            }
            JobIdMode::Random => uuid::Uuid::new_v4().to_string(),
        };

        let staged_name = staged_filename(&upload.filename, &job_id);
        let mut job = Job::new(job_id.clone(), self.uploads_dir.join(&staged_name).to_string_lossy());

        match self.staging_mode {
            StagingMode::Local => self.stage_locally(&job.image_path, &upload.bytes).await?,
            StagingMode::ObjectStorage => {
                self.stage_remotely(&mut job, &staged_name, upload.bytes).await?
            }
        }

        let payload = serde_json::to_string(&job)?;
        self.broker.publish(OCR_QUEUE, &payload).await?;
        self.store.set_status(&job.job_id, JobStatus::Submitted).await?;

        metrics::counter!("jobs_submitted_total").increment(1);
        tracing::info!(
            job_id = %job.job_id,
            image_path = %job.image_path,
            remote = job.uses_remote_image(),
            "Job admitted"
        );
        Ok(Admission::Created(job_id))
    }

    async fn stage_locally(&self, image_path: &str, bytes: &[u8]) -> Result<(), AdmissionError> {
        tokio::fs::create_dir_all(&self.uploads_dir).await?;
        tokio::fs::write(image_path, bytes).await?;
        Ok(())
    }

    async fn stage_remotely(
        &self,
        job: &mut Job,
        staged_name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), AdmissionError> {
        let storage = self.storage.as_ref().ok_or(AdmissionError::StorageNotConfigured)?;
        let key = format!("uploads/{staged_name}");

        let upload_url = storage.presign_upload(&key, self.presign_ttl_secs).await?;
        job.image_download_url = storage.presign_download(&key, self.presign_ttl_secs).await?;
        job.pdf_upload_url = storage
            .presign_upload(&output_key(&format!("{}.pdf", job.job_id)), self.presign_ttl_secs)
            .await?;

        storage.stream_put(&upload_url, bytes).await?;
        Ok(())
    }
}

/// `<stem>-<job_id><.ext>`, keeping only the final path component of the
/// client-supplied name.
fn staged_filename(original: &str, job_id: &str) -> String {
    let name = Path::new(original)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("upload");
    let path = Path::new(name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("upload");
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}-{job_id}.{ext}"),
        None => format!("{stem}-{job_id}"),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("No file was uploaded")]
    MissingFile,

    #[error("Uploaded file is empty")]
    EmptyUpload,

    #[error("Uploaded file is not a supported image")]
    UnsupportedImage,

    #[error("Failed to stage upload locally: {0}")]
    Staging(#[from] std::io::Error),

    #[error("Object storage staging requested but no storage is configured")]
    StorageNotConfigured,

    #[error("Failed to stage upload in object storage: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to serialize job: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to publish job: {0}")]
    Publish(#[from] BrokerError),

    #[error("Status store error: {0}")]
    Store(#[from] StoreError),
}

impl AdmissionError {
    /// Bad input is the client's fault; everything else is ours.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AdmissionError::MissingFile | AdmissionError::EmptyUpload | AdmissionError::UnsupportedImage
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_sha256_hex() {
        assert_eq!(
            fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn staged_filename_strips_directories() {
        assert_eq!(staged_filename("scan.png", "abc"), "scan-abc.png");
        assert_eq!(staged_filename("../../etc/passwd", "abc"), "passwd-abc");
        assert_eq!(staged_filename("", "abc"), "upload-abc");
        assert_eq!(staged_filename("dir/page.one.jpg", "id"), "page.one-id.jpg");
    }

    #[test]
    fn output_key_lives_under_output() {
        assert_eq!(output_key("abc.pdf"), "output/abc.pdf");
    }
}
