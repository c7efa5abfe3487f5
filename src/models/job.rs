use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{AsRefStr, Display, EnumString};

/// Status of a job as recorded in the status store.
///
/// Transitions only move forward: `submitted → ocr-in-progress →
/// translation-in-progress → completed | failed`. Both terminal states rank
/// equally and are never overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum JobStatus {
    Submitted,
    OcrInProgress,
    TranslationInProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn rank(self) -> u8 {
        match self {
            JobStatus::Submitted => 0,
            JobStatus::OcrInProgress => 1,
            JobStatus::TranslationInProgress => 2,
            JobStatus::Completed | JobStatus::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether a store currently holding `self` may be overwritten with `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

/// One submitted document, threaded by value through every pipeline stage.
///
/// `job_id` is the join key between the queue record, the status entry and
/// the output artifact name. Empty strings mean "absent": an empty
/// `image_download_url` tells the OCR stage to read `image_path` from local
/// disk, an empty `pdf_upload_url` tells the render stage to write into the
/// local output directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    #[serde(default)]
    pub image_path: String,
    #[serde(default)]
    pub image_download_url: String,
    #[serde(default)]
    pub pdf_upload_url: String,
    #[serde(default)]
    pub extracted_text: String,
    #[serde(default)]
    pub translated_text: String,
    #[serde(default)]
    pub output_path: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(job_id: impl Into<String>, image_path: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            image_path: image_path.into(),
            image_download_url: String::new(),
            pdf_upload_url: String::new(),
            extracted_text: String::new(),
            translated_text: String::new(),
            output_path: String::new(),
            submitted_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn uses_remote_image(&self) -> bool {
        !self.image_download_url.is_empty()
    }

    pub fn uses_remote_output(&self) -> bool {
        !self.pdf_upload_url.is_empty()
    }

    /// Mark the job complete now and return the end-to-end response time.
    pub fn complete(&mut self) -> Duration {
        let now = Utc::now();
        self.completed_at = Some(now);
        self.response_time().unwrap_or_default()
    }

    /// `completed_at - submitted_at`, clamped at zero for skewed clocks.
    pub fn response_time(&self) -> Option<Duration> {
        let completed = self.completed_at?;
        Some((completed - self.submitted_at).to_std().unwrap_or_default())
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}
