use async_trait::async_trait;
use reqwest::Client;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::S3Settings;

/// Object storage reached through pre-signed URLs.
///
/// Workers never hold credentials: the ingestion service presigns every URL a
/// job needs and the stages only stream bytes to or from them.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn presign_upload(&self, key: &str, ttl_secs: u32) -> Result<String, StorageError>;

    async fn presign_download(&self, key: &str, ttl_secs: u32) -> Result<String, StorageError>;

    async fn stream_put(&self, url: &str, data: Vec<u8>) -> Result<(), StorageError>;

    async fn stream_get(&self, url: &str) -> Result<Vec<u8>, StorageError>;
}

/// Client for S3-compatible object storage.
pub struct S3Storage {
    bucket: Box<Bucket>,
    http: Client,
}

impl S3Storage {
    pub fn new(settings: &S3Settings) -> Result<Self, StorageError> {
        let region = match &settings.endpoint {
            Some(endpoint) => Region::Custom {
                region: settings.region.clone(),
                endpoint: endpoint.clone(),
            },
            None => settings
                .region
                .parse::<Region>()
                .map_err(|e| StorageError::Config(format!("invalid region: {e:?}")))?,
        };

        let credentials = Credentials::new(
            Some(settings.access_key.as_str()),
            Some(settings.secret_key.as_str()),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::Config(e.to_string()))?;

        let mut bucket = Bucket::new(&settings.bucket, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;
        if settings.endpoint.is_some() {
            bucket = bucket.with_path_style();
        }

        Ok(Self {
            bucket,
            http: Client::new(),
        })
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn presign_upload(&self, key: &str, ttl_secs: u32) -> Result<String, StorageError> {
        Ok(self.bucket.presign_put(key, ttl_secs, None, None).await?)
    }

    async fn presign_download(&self, key: &str, ttl_secs: u32) -> Result<String, StorageError> {
        Ok(self.bucket.presign_get(key, ttl_secs, None).await?)
    }

    async fn stream_put(&self, url: &str, data: Vec<u8>) -> Result<(), StorageError> {
        let response = self
            .http
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    async fn stream_get(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Object storage kept in process memory; URLs are `memory://<op>/<key>`.
#[derive(Default)]
pub struct InMemoryObjectStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().ok()?.get(key).cloned()
    }

    fn key_for(url: &str, op: &str) -> Result<String, StorageError> {
        url.strip_prefix(&format!("memory://{op}/"))
            .map(str::to_string)
            .ok_or_else(|| StorageError::Config(format!("not a {op} URL: {url}")))
    }
}

#[async_trait]
impl ObjectStorage for InMemoryObjectStorage {
    async fn presign_upload(&self, key: &str, _ttl_secs: u32) -> Result<String, StorageError> {
        Ok(format!("memory://put/{key}"))
    }

    async fn presign_download(&self, key: &str, _ttl_secs: u32) -> Result<String, StorageError> {
        Ok(format!("memory://get/{key}"))
    }

    async fn stream_put(&self, url: &str, data: Vec<u8>) -> Result<(), StorageError> {
        let key = Self::key_for(url, "put")?;
        self.objects
            .lock()
            .map_err(|_| StorageError::Config("storage lock poisoned".into()))?
            .insert(key, data);
        Ok(())
    }

    async fn stream_get(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        let key = Self::key_for(url, "get")?;
        self.object(&key).ok_or(StorageError::Rejected {
            status: 404,
            body: format!("no object {key}"),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Transfer failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage rejected transfer with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Storage configuration error: {0}")]
    Config(String),
}
