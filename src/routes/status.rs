use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::app_state::AppState;
use crate::models::responses::{AverageResponseTime, ErrorResponse, StatusResponse};

/// GET /status/{job_id}: current pipeline status of a job.
pub async fn job_status(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    match state.store.get_status(&job_id).await {
        Ok(Some(status)) => Json(StatusResponse {
            status: status.to_string(),
        })
        .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(StatusResponse {
                status: "not found".to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Status lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Status store unavailable".to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// GET /average-response-time: mean end-to-end seconds over completed jobs.
pub async fn average_response_time(
    State(state): State<AppState>,
) -> Result<Json<AverageResponseTime>, (StatusCode, Json<ErrorResponse>)> {
    let stats = state.store.aggregate().await.map_err(|e| {
        tracing::error!(error = %e, "Aggregate lookup failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "Status store unavailable".to_string(),
            }),
        )
    })?;

    Ok(Json(AverageResponseTime {
        average_request_processing_time: stats.average(),
        total_requests: stats.total_requests,
    }))
}
