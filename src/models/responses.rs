use serde::{Deserialize, Serialize};

/// Response after submitting a document.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    #[serde(rename = "jobID")]
    pub job_id: String,
}

/// Response for querying job status. Unknown jobs carry `"not found"`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AverageResponseTime {
    /// Mean seconds from submission to completion over all completed jobs
    pub average_request_processing_time: f64,
    pub total_requests: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CloudDownloadResponse {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
