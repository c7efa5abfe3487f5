use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub store: ComponentHealth,
    pub broker: ComponentHealth,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentHealth {
    Ok,
    Unhealthy,
}

/// GET /health: status store and broker reachability.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store = match state.store.health_check().await {
        Ok(()) => ComponentHealth::Ok,
        Err(e) => {
            tracing::warn!(error = %e, "Status store health check failed");
            ComponentHealth::Unhealthy
        }
    };

    let broker = match state.broker.health_check().await {
        Ok(()) => ComponentHealth::Ok,
        Err(e) => {
            tracing::warn!(error = %e, "Broker health check failed");
            ComponentHealth::Unhealthy
        }
    };

    let status_code = if store == ComponentHealth::Ok && broker == ComponentHealth::Ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        store,
        broker,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    };

    (status_code, Json(response))
}
