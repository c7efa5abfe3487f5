use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::models::responses::{CloudDownloadResponse, ErrorResponse};
use crate::services::ingestion::output_key;

fn error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// A bare file name: no separators, no parent references.
fn is_safe_filename(filename: &str) -> bool {
    !filename.is_empty()
        && filename != "."
        && !filename.contains("..")
        && !filename.contains(['/', '\\'])
}

/// GET /download/{filename}: serve a rendered artifact from the output directory.
pub async fn download(State(state): State<AppState>, Path(filename): Path<String>) -> Response {
    if !is_safe_filename(&filename) {
        return error(StatusCode::BAD_REQUEST, "Invalid file name");
    }

    let path = state.output_dir.join(&filename);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let content_type = if filename.ends_with(".pdf") {
                "application/pdf"
            } else {
                "application/octet-stream"
            };
            (
                [
                    (header::CONTENT_TYPE, content_type.to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{filename}\""),
                    ),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            error(StatusCode::NOT_FOUND, "File not found")
        }
        Err(e) => {
            tracing::error!(file = %filename, error = %e, "Failed to read artifact");
            error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read file")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CloudDownloadParams {
    /// `false` returns the URL as JSON instead of redirecting.
    pub redirect: Option<bool>,
}

/// GET /cloud_download/{filename}: presigned download URL for an output object.
pub async fn cloud_download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Query(params): Query<CloudDownloadParams>,
) -> Response {
    if !is_safe_filename(&filename) {
        return error(StatusCode::BAD_REQUEST, "Invalid file name");
    }
    let Some(storage) = state.storage.as_ref() else {
        return error(StatusCode::NOT_FOUND, "Object storage is not configured");
    };

    let url = match storage
        .presign_download(&output_key(&filename), state.presign_ttl_secs)
        .await
    {
        Ok(url) => url,
        Err(e) => {
            tracing::error!(file = %filename, error = %e, "Failed to presign download");
            return error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create download URL");
        }
    };

    if params.redirect.unwrap_or(true) {
        Redirect::temporary(&url).into_response()
    } else {
        Json(CloudDownloadResponse { url }).into_response()
    }
}
