use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: i64,
    pub devices: usize,
    pub partitions: usize,
}

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(health))
}

/// Service health and basic counters.
#[utoipa::path(
    get,
    path = "/v1/health",
    tag = "System",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
async fn health(
    Extension(_trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let devices = state.registry.list_devices(false).map(|d| d.len()).unwrap_or(0);
    let partitions = state.store.list_partitions().map(|p| p.len()).unwrap_or(0);

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: (Utc::now() - state.start_time).num_seconds(),
        devices,
        partitions,
    })
}
