use serde::Deserialize;

/// How the ingestion service derives a job identifier.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobIdMode {
    /// SHA-256 of the uploaded bytes; identical uploads share one job.
    Fingerprint,
    /// Fresh UUID per upload, no deduplication.
    Random,
}

/// Where uploaded images and rendered PDFs live.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StagingMode {
    Local,
    ObjectStorage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8080"). Unused by worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string, shared by the status store and the job queue
    pub redis_url: String,

    #[serde(default = "default_job_id_mode")]
    pub job_id_mode: JobIdMode,

    #[serde(default = "default_staging_mode")]
    pub staging_mode: StagingMode,

    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: String,

    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// TrueType font for rendered PDFs; built-in Helvetica when unset
    pub pdf_font_path: Option<String>,

    /// S3 bucket name (object-storage staging only)
    pub s3_bucket: Option<String>,

    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    /// S3-compatible endpoint URL; empty means the AWS endpoint for `s3_region`
    pub s3_endpoint: Option<String>,

    pub s3_access_key: Option<String>,

    pub s3_secret_key: Option<String>,

    /// Lifetime of every pre-signed URL, in seconds
    #[serde(default = "default_presign_ttl_secs")]
    pub presign_ttl_secs: u32,

    /// Text recognition service endpoint
    #[serde(default = "default_ocr_endpoint")]
    pub ocr_endpoint: String,

    pub ocr_api_token: Option<String>,

    /// LibreTranslate-compatible translation endpoint
    #[serde(default = "default_translate_endpoint")]
    pub translate_endpoint: String,

    #[serde(default = "default_source_lang")]
    pub source_lang: String,

    #[serde(default = "default_target_lang")]
    pub target_lang: String,

    /// Number of workers per pool; at least the top prefetch ceiling so it can bind
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Upper bound on concurrent segment recognitions inside one OCR job
    #[serde(default = "default_segment_concurrency")]
    pub segment_concurrency: usize,

    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    #[serde(default = "default_backpressure_interval_secs")]
    pub backpressure_interval_secs: u64,

    #[serde(default = "default_broker_connect_timeout_secs")]
    pub broker_connect_timeout_secs: u64,

    #[serde(default = "default_rate_limit_per_second")]
    pub rate_limit_per_second: u32,

    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,

    #[serde(default = "default_rate_limit_idle_secs")]
    pub rate_limit_idle_secs: u64,

    /// Stable consumer identity; names the in-flight lists recovered on restart.
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Prometheus listener for worker processes; workers export nothing when unset
    pub worker_metrics_addr: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_job_id_mode() -> JobIdMode {
    JobIdMode::Fingerprint
}

fn default_staging_mode() -> StagingMode {
    StagingMode::Local
}

fn default_uploads_dir() -> String {
    "./uploads".to_string()
}

fn default_output_dir() -> String {
    "./output".to_string()
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_presign_ttl_secs() -> u32 {
    15 * 60
}

fn default_ocr_endpoint() -> String {
    "http://localhost:8884/ocr".to_string()
}

fn default_translate_endpoint() -> String {
    "http://localhost:5000/translate".to_string()
}

fn default_source_lang() -> String {
    "en".to_string()
}

fn default_target_lang() -> String {
    "vi".to_string()
}

fn default_worker_concurrency() -> usize {
    5
}

fn default_segment_concurrency() -> usize {
    8
}

fn default_poll_timeout_secs() -> u64 {
    1
}

fn default_backpressure_interval_secs() -> u64 {
    5
}

fn default_broker_connect_timeout_secs() -> u64 {
    5
}

fn default_rate_limit_per_second() -> u32 {
    5
}

fn default_rate_limit_burst() -> u32 {
    10
}

fn default_rate_limit_idle_secs() -> u64 {
    60
}

fn default_consumer_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string())
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

/// Object-storage settings, present only when every credential is configured.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: AppConfig = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_concurrency == 0 {
            return Err(ConfigError::Invalid("WORKER_CONCURRENCY must be at least 1".into()));
        }
        if self.poll_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "POLL_TIMEOUT_SECS must be at least 1; a zero timeout blocks forever".into(),
            ));
        }
        if self.segment_concurrency == 0 {
            return Err(ConfigError::Invalid("SEGMENT_CONCURRENCY must be at least 1".into()));
        }
        if self.rate_limit_per_second == 0 || self.rate_limit_burst == 0 {
            return Err(ConfigError::Invalid(
                "RATE_LIMIT_PER_SECOND and RATE_LIMIT_BURST must be positive".into(),
            ));
        }
        if self.staging_mode == StagingMode::ObjectStorage && self.s3_settings().is_none() {
            return Err(ConfigError::Invalid(
                "object storage staging requires S3_BUCKET, S3_ACCESS_KEY and S3_SECRET_KEY".into(),
            ));
        }
        Ok(())
    }

    pub fn s3_settings(&self) -> Option<S3Settings> {
        Some(S3Settings {
            bucket: self.s3_bucket.clone().filter(|b| !b.is_empty())?,
            region: self.s3_region.clone(),
            endpoint: self.s3_endpoint.clone().filter(|e| !e.is_empty()),
            access_key: self.s3_access_key.clone()?,
            secret_key: self.s3_secret_key.clone()?,
        })
    }
}
