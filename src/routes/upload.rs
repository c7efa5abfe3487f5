use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::app_state::AppState;
use crate::models::responses::{ErrorResponse, UploadResponse};
use crate::services::ingestion::{Admission, AdmissionError, Upload};

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        if self.is_client_error() {
            let body = ErrorResponse {
                error: self.to_string(),
            };
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }

        tracing::error!(error = %self, "Admission failed");
        let body = ErrorResponse {
            error: "Failed to submit job".to_string(),
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

/// POST /upload: admit one document image (multipart field `file`).
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AdmissionError> {
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| AdmissionError::MissingFile)?
    {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await.map_err(|_| AdmissionError::MissingFile)?;
            upload = Some(Upload {
                filename,
                bytes: bytes.to_vec(),
            });
        }
    }

    let upload = upload.ok_or(AdmissionError::MissingFile)?;
    let admission = state.ingestion.admit(upload).await?;

    let message = match admission {
        Admission::Created(_) => "Job submitted",
        Admission::Existing(_) => "Job already submitted",
    };
    Ok(Json(UploadResponse {
        message: message.to_string(),
        job_id: admission.job_id().to_string(),
    }))
}
