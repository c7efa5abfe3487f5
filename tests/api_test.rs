//! HTTP surface of the ingestion API, driven through the router in-process.

mod fixtures;
mod helpers;

use axum::http::{header, StatusCode};
use fixtures::*;
use helpers::*;
use std::sync::Arc;
use tower::ServiceExt;

use scan_translate::services::storage::{InMemoryObjectStorage, ObjectStorage};

#[tokio::test]
async fn unknown_job_is_not_found() {
    let pipeline = Pipeline::new();
    let response = pipeline.router().oneshot(get("/status/nope")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["status"], "not found");
}

#[tokio::test]
async fn status_lookup_during_store_outage_is_a_server_error() {
    let pipeline = Pipeline::new();
    pipeline.store.set_available(false);

    let response = pipeline.router().oneshot(get("/status/abc")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert!(body.get("status").is_none());
    assert_eq!(body["error"], "Status store unavailable");
}

#[tokio::test]
async fn upload_without_file_field_is_rejected() {
    let pipeline = Pipeline::new();
    let body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nvalue\r\n--{BOUNDARY}--\r\n"
    );
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(axum::body::Body::from(body))
        .unwrap();

    let response = pipeline.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn non_image_upload_is_rejected() {
    let pipeline = Pipeline::new();
    let response = pipeline
        .router()
        .oneshot(upload_request(NOT_AN_IMAGE, "doc.pdf", "10.1.0.1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"].is_string());
    assert_eq!(pipeline.broker.published(scan_translate::services::broker::OCR_QUEUE), 0);
}

#[tokio::test]
async fn empty_upload_is_rejected() {
    let pipeline = Pipeline::new();
    let response = pipeline
        .router()
        .oneshot(upload_request(b"", "empty.png", "10.1.0.2"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn uploads_over_the_burst_are_throttled() {
    let pipeline = Pipeline::new();
    let app = pipeline.router_with_limit(1, 2);

    let mut statuses = Vec::new();
    for seed in 0..3 {
        let response = app
            .clone()
            .oneshot(upload_request(&page_png(seed), "page.png", "192.168.1.10"))
            .await
            .unwrap();
        statuses.push(response.status());
    }
    assert_eq!(
        statuses,
        vec![StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
    );

    // Another client has its own bucket.
    let response = app
        .clone()
        .oneshot(upload_request(&page_png(9), "page.png", "192.168.1.11"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Status reads are never throttled.
    for _ in 0..5 {
        let response = app.clone().oneshot(get("/status/unknown")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn health_reports_each_dependency() {
    let pipeline = Pipeline::new();

    let response = pipeline.router().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["store"], "ok");
    assert_eq!(body["broker"], "ok");
    assert!(body["timestamp"].is_string());

    pipeline.broker.set_available(false);
    let response = pipeline.router().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["store"], "ok");
    assert_eq!(body["broker"], "unhealthy");
}

#[tokio::test]
async fn average_response_time_starts_at_zero() {
    let pipeline = Pipeline::new();
    let response = pipeline
        .router()
        .oneshot(get("/average-response-time"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["average_request_processing_time"], 0.0);
    assert_eq!(body["total_requests"], 0);
}

#[tokio::test]
async fn average_response_time_reflects_completions() {
    let pipeline = Pipeline::new();
    for seed in 30..32 {
        pipeline
            .router()
            .oneshot(upload_request(&page_png(seed), "page.png", "10.2.0.1"))
            .await
            .unwrap();
    }
    pipeline.drain().await;

    let body = body_json(
        pipeline
            .router()
            .oneshot(get("/average-response-time"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(body["total_requests"], 2);
    assert!(body["average_request_processing_time"].as_f64().unwrap() >= 0.0);
}

#[tokio::test]
async fn download_rejects_traversal_and_missing_files() {
    let pipeline = Pipeline::new();

    let response = pipeline
        .router()
        .oneshot(get("/download/..%2Fsecret.pdf"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = pipeline
        .router()
        .oneshot(get("/download/missing.pdf"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cloud_download_without_storage_is_not_found() {
    let pipeline = Pipeline::new();
    let response = pipeline
        .router()
        .oneshot(get("/cloud_download/abc.pdf"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cloud_download_redirects_or_returns_url() {
    let storage = Arc::new(InMemoryObjectStorage::new());
    let pipeline = Pipeline::with_storage(&[], storage.clone() as Arc<dyn ObjectStorage>);

    let response = pipeline
        .router()
        .oneshot(get("/cloud_download/abc.pdf"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let expected = storage.presign_download("output/abc.pdf", 900).await.unwrap();
    assert_eq!(response.headers()[header::LOCATION], expected.as_str());

    let response = pipeline
        .router()
        .oneshot(get("/cloud_download/abc.pdf?redirect=false"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["url"], expected.as_str());
}

#[tokio::test]
async fn object_storage_staging_round_trips_through_presigned_urls() {
    let storage = Arc::new(InMemoryObjectStorage::new());
    let pipeline = Pipeline::with_storage(
        &[("STAGING_MODE", "object_storage")],
        storage.clone() as Arc<dyn ObjectStorage>,
    );

    let bytes = page_png(40);
    let body = body_json(
        pipeline
            .router()
            .oneshot(upload_request(&bytes, "scan.png", "10.3.0.1"))
            .await
            .unwrap(),
    )
    .await;
    let job_id = body["jobID"].as_str().unwrap().to_string();

    assert_eq!(
        storage.object(&format!("uploads/scan-{job_id}.png")).unwrap(),
        bytes
    );

    pipeline.drain().await;

    let pdf = storage.object(&format!("output/{job_id}.pdf")).unwrap();
    assert!(pdf.starts_with(b"%PDF"));
    assert!(!pipeline
        .dirs
        .path()
        .join("output")
        .join(format!("{job_id}.pdf"))
        .exists());
}
