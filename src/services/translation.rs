use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Machine translation between two fixed languages.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String, TranslateError>;
}

/// Client for a LibreTranslate-compatible HTTP API.
pub struct HttpTranslator {
    http: Client,
    endpoint: String,
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'static str,
}

#[derive(Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

impl HttpTranslator {
    pub fn new(endpoint: String) -> Self {
        Self {
            http: Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String, TranslateError> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }

        let response = self
            .http
            .post(&self.endpoint)
            .json(&TranslateRequest {
                q: text,
                source,
                target,
                format: "text",
            })
            .send()
            .await?
            .error_for_status()?;

        let body: TranslateResponse = response.json().await?;
        Ok(body.translated_text)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}
