use async_trait::async_trait;
use base64::Engine;
use futures::future::try_join_all;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Recognizes the text in one image segment.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &[u8]) -> Result<String, OcrError>;
}

/// Client for an HTTP text-recognition service.
///
/// Posts `{"image": <base64>}` and expects `{"text": "..."}` back.
pub struct HttpTextRecognizer {
    http: Client,
    endpoint: String,
    api_token: Option<String>,
}

#[derive(Deserialize)]
struct RecognitionResponse {
    text: String,
}

impl HttpTextRecognizer {
    pub fn new(endpoint: String, api_token: Option<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint,
            api_token,
        }
    }
}

#[async_trait]
impl TextRecognizer for HttpTextRecognizer {
    async fn recognize(&self, image: &[u8]) -> Result<String, OcrError> {
        let request_body = serde_json::json!({
            "image": base64::engine::general_purpose::STANDARD.encode(image),
        });

        let mut request = self.http.post(&self.endpoint).json(&request_body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?.error_for_status()?;
        let body: RecognitionResponse = response.json().await?;

        // Line breaks inside one segment are layout artifacts, not paragraph ends.
        Ok(body.text.replace('\n', ""))
    }
}

/// Recognize every segment concurrently and join the results in segment order.
///
/// At most `max_concurrency` recognitions run at once. Each segment runs as its
/// own task, so the first failure decides the result without cancelling the
/// siblings already in flight.
pub async fn extract_text(
    recognizer: Arc<dyn TextRecognizer>,
    segments: Vec<Vec<u8>>,
    max_concurrency: usize,
) -> Result<String, OcrError> {
    let permits = Arc::new(Semaphore::new(max_concurrency.max(1)));

    let handles: Vec<_> = segments
        .into_iter()
        .map(|segment| {
            let recognizer = recognizer.clone();
            let permits = permits.clone();
            tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.map_err(|_| OcrError::Cancelled)?;
                recognizer.recognize(&segment).await
            })
        })
        .collect();

    let texts = try_join_all(
        handles
            .into_iter()
            .map(|handle| async move { handle.await.map_err(|_| OcrError::Cancelled)? }),
    )
    .await?;
    Ok(texts.join("\n"))
}

/// Reference path: recognize segments one after another.
pub async fn extract_text_sequential(
    recognizer: &dyn TextRecognizer,
    segments: &[Vec<u8>],
) -> Result<String, OcrError> {
    let mut texts = Vec::with_capacity(segments.len());
    for segment in segments {
        texts.push(recognizer.recognize(segment).await?);
    }
    Ok(texts.join("\n"))
}

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Recognition failed: {0}")]
    Recognition(String),

    #[error("Recognition task was cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Echoes the segment bytes as text, with a delay that finishes later
    /// segments first.
    struct EchoRecognizer {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl TextRecognizer for EchoRecognizer {
        async fn recognize(&self, image: &[u8]) -> Result<String, OcrError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let delay = 40u64.saturating_sub(image.len() as u64 * 5);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if image == b"bad" {
                return Err(OcrError::Recognition("unreadable".into()));
            }
            Ok(String::from_utf8_lossy(image).into_owned())
        }
    }

    fn echo() -> Arc<EchoRecognizer> {
        Arc::new(EchoRecognizer {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    fn segments(parts: &[&str]) -> Vec<Vec<u8>> {
        parts.iter().map(|p| p.as_bytes().to_vec()).collect()
    }

    #[tokio::test]
    async fn concurrent_matches_sequential() {
        let recognizer = echo();
        let parts = segments(&["a", "bb", "ccc", "dddd", "eeeee"]);
        let concurrent = extract_text(recognizer.clone(), parts.clone(), 8).await.unwrap();
        let sequential = extract_text_sequential(recognizer.as_ref(), &parts).await.unwrap();
        assert_eq!(concurrent, sequential);
        assert_eq!(concurrent, "a\nbb\nccc\ndddd\neeeee");
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let recognizer = echo();
        let parts = segments(&["a", "b", "c", "d", "e", "f"]);
        extract_text(recognizer.clone(), parts, 2).await.unwrap();
        assert!(recognizer.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn any_failure_fails_the_whole_page() {
        let recognizer = echo();
        let parts = segments(&["a", "bad", "c"]);
        let result = extract_text(recognizer, parts, 4).await;
        assert!(matches!(result, Err(OcrError::Recognition(_))));
    }

    /// Slow on every segment except `bad`, which fails at once.
    struct FastFailure;

    #[async_trait]
    impl TextRecognizer for FastFailure {
        async fn recognize(&self, image: &[u8]) -> Result<String, OcrError> {
            if image == b"bad" {
                return Err(OcrError::Recognition("unreadable".into()));
            }
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(String::from_utf8_lossy(image).into_owned())
        }
    }

    #[tokio::test]
    async fn earliest_failure_wins_over_slow_earlier_segments() {
        let parts = segments(&["a", "b", "bad"]);
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            extract_text(Arc::new(FastFailure), parts, 4),
        )
        .await
        .expect("failure should not wait for slower segments");
        assert!(matches!(result, Err(OcrError::Recognition(_))));
    }

    #[tokio::test]
    async fn no_segments_yield_empty_text() {
        assert_eq!(extract_text(echo(), Vec::new(), 4).await.unwrap(), "");
    }
}
