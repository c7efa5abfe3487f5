//! Test harness: the full pipeline wired over in-memory adapters

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request};
use axum::Router;
use http_body_util::BodyExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use scan_translate::{
    app_state::AppState,
    config::AppConfig,
    middleware::rate_limit::RateLimiterRegistry,
    routes,
    services::{
        broker::{InMemoryBroker, MessageBroker, OCR_QUEUE, TRANSLATION_QUEUE},
        ocr::{OcrError, TextRecognizer},
        pdf::PrintPdfRenderer,
        segmentation::RowIntensitySegmenter,
        status_store::InMemoryStatusStore,
        storage::ObjectStorage,
        translation::{TranslateError, Translator},
    },
    workers::{
        ocr_stage::OcrStage,
        pool::{Processed, WorkerPool},
        render_stage::{LanguagePair, RenderStage},
    },
};

pub const BOUNDARY: &str = "scan-translate-test-boundary";

/// Recognizer that reads every segment as the same line, or fails on demand.
pub struct StubRecognizer {
    pub calls: AtomicUsize,
    pub fail: bool,
}

#[async_trait]
impl TextRecognizer for StubRecognizer {
    async fn recognize(&self, _image: &[u8]) -> Result<String, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(OcrError::Recognition("page unreadable".into()));
        }
        Ok("hello world".to_string())
    }
}

/// Translator that upper-cases its input and counts calls.
pub struct StubTranslator {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Translator for StubTranslator {
    async fn translate(&self, text: &str, _source: &str, _target: &str) -> Result<String, TranslateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(text.to_uppercase())
    }
}

pub fn config(dirs: &TempDir, extra: &[(&str, &str)]) -> AppConfig {
    let mut vars = vec![
        ("REDIS_URL".to_string(), "redis://127.0.0.1/".to_string()),
        (
            "UPLOADS_DIR".to_string(),
            dirs.path().join("uploads").to_string_lossy().into_owned(),
        ),
        (
            "OUTPUT_DIR".to_string(),
            dirs.path().join("output").to_string_lossy().into_owned(),
        ),
    ];
    vars.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    envy::from_iter(vars).expect("test config")
}

/// Ingestion API plus both stages over one in-memory broker and store.
pub struct Pipeline {
    pub dirs: TempDir,
    pub config: AppConfig,
    pub store: Arc<InMemoryStatusStore>,
    pub broker: Arc<InMemoryBroker>,
    pub state: AppState,
    pub recognizer: Arc<StubRecognizer>,
    pub translator: Arc<StubTranslator>,
    pub ocr: WorkerPool,
    pub render: WorkerPool,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::build(&[], false, None)
    }

    pub fn with_env(extra: &[(&str, &str)]) -> Self {
        Self::build(extra, false, None)
    }

    pub fn failing_ocr() -> Self {
        Self::build(&[], true, None)
    }

    pub fn with_storage(extra: &[(&str, &str)], storage: Arc<dyn ObjectStorage>) -> Self {
        Self::build(extra, false, Some(storage))
    }

    fn build(extra: &[(&str, &str)], fail_ocr: bool, storage: Option<Arc<dyn ObjectStorage>>) -> Self {
        let dirs = tempfile::tempdir().expect("tempdir");
        let config = config(&dirs, extra);
        let store = Arc::new(InMemoryStatusStore::new());
        let broker = Arc::new(InMemoryBroker::new());
        let recognizer = Arc::new(StubRecognizer {
            calls: AtomicUsize::new(0),
            fail: fail_ocr,
        });
        let translator = Arc::new(StubTranslator {
            calls: AtomicUsize::new(0),
        });

        let state = AppState::new(&config, store.clone(), broker.clone(), storage.clone());

        let ocr_stage = OcrStage::new(
            store.clone(),
            broker.clone(),
            storage.clone(),
            Arc::new(RowIntensitySegmenter::default()),
            recognizer.clone(),
            4,
        );
        let render_stage = RenderStage::new(
            store.clone(),
            storage,
            translator.clone(),
            Arc::new(PrintPdfRenderer::new()),
            LanguagePair {
                source: "en".into(),
                target: "vi".into(),
            },
            config.output_dir.clone(),
        );

        let ocr = WorkerPool::new(OCR_QUEUE, "test", 1, broker.clone(), store.clone(), Arc::new(ocr_stage))
            .with_poll_timeout(Duration::from_millis(10));
        let render = WorkerPool::new(
            TRANSLATION_QUEUE,
            "test",
            1,
            broker.clone(),
            store.clone(),
            Arc::new(render_stage),
        )
        .with_poll_timeout(Duration::from_millis(10));

        Self {
            dirs,
            config,
            store,
            broker,
            state,
            recognizer,
            translator,
            ocr,
            render,
        }
    }

    /// Router with a limiter generous enough never to interfere.
    pub fn router(&self) -> Router {
        self.router_with_limit(1000, 1000)
    }

    pub fn router_with_limit(&self, per_second: u32, burst: u32) -> Router {
        let limiter = Arc::new(RateLimiterRegistry::new(per_second, burst, Duration::from_secs(60)));
        routes::api_router(self.state.clone(), limiter, self.config.max_upload_bytes)
    }

    /// Run both stages until neither queue yields a message.
    pub async fn drain(&self) {
        loop {
            let ocr = self.ocr.process_next(&self.ocr.consumer(0)).await.expect("ocr stage");
            let render = self
                .render
                .process_next(&self.render.consumer(0))
                .await
                .expect("render stage");
            if ocr == Processed::Idle && render == Processed::Idle {
                break;
            }
        }
    }

    pub async fn depth(&self, queue: &str) -> u64 {
        self.broker.depth(queue).await.expect("depth")
    }
}

pub fn upload_request(bytes: &[u8], filename: &str, client: &str) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n").as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header("x-forwarded-for", client)
        .body(Body::from(body))
        .expect("upload request")
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("get request")
}

pub async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}
