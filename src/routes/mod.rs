pub mod download;
pub mod health;
pub mod metrics;
pub mod status;
pub mod upload;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::sync::Arc;

use crate::app_state::AppState;
use crate::middleware::rate_limit::{rate_limit, RateLimiterRegistry};

/// Ingestion API routes. Only `/upload` is rate limited.
pub fn api_router(state: AppState, limiter: Arc<RateLimiterRegistry>, max_upload_bytes: usize) -> Router {
    let admission = Router::new()
        .route("/upload", post(upload::upload))
        .route_layer(middleware::from_fn_with_state(limiter, rate_limit))
        .layer(DefaultBodyLimit::max(max_upload_bytes));

    Router::new()
        .merge(admission)
        .route("/status/{job_id}", get(status::job_status))
        .route("/average-response-time", get(status::average_response_time))
        .route("/download/{filename}", get(download::download))
        .route("/cloud_download/{filename}", get(download::cloud_download))
        .route("/health", get(health::health_check))
        .with_state(state)
}
