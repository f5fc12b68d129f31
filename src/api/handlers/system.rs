use axum::{extract::State, Json};
use chrono::Utc;

use crate::api::{
    handlers::execute::new_rid,
    state::AppState,
    types::{HealthResponse, ServiceInfo},
};

pub const SERVICE_NAME: &str = "spot-executor";

/// GET /
pub async fn service_info() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        ok: true,
        service: SERVICE_NAME,
        ts: Utc::now().timestamp_millis(),
        rid: new_rid(),
    })
}

/// GET|HEAD /healthz, /healthz/, /health -- liveness only, no upstream checks
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        status: "ok",
        uptime_secs: state.uptime_seconds(),
    })
}
