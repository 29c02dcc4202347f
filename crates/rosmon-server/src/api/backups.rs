use crate::api::error_response;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rosmon_device::backup::{BackupArtifact, BackupError, RestoreOutcome};
use rosmon_storage::registry::DeviceRow;
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

#[derive(Debug, Deserialize, ToSchema)]
pub struct RestoreRequest {
    /// Name of the backup artifact on the device.
    pub artifact: String,
}

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(create_backup))
        .routes(routes!(restore_backup))
}

fn load_device(state: &AppState, id: &str, trace_id: &str) -> Result<DeviceRow, Response> {
    match state.registry.get_device(id) {
        Ok(Some(device)) => Ok(device),
        Ok(None) => Err(error_response(
            StatusCode::NOT_FOUND,
            trace_id,
            "not_found",
            "Unknown device",
        )),
        Err(e) => {
            tracing::error!(error = %e, "Failed to load device");
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                trace_id,
                "storage_error",
                "Database error",
            ))
        }
    }
}

fn map_backup_error(err: BackupError, trace_id: &str) -> Response {
    match err {
        BackupError::InvalidArtifactName(_) => error_response(
            StatusCode::BAD_REQUEST,
            trace_id,
            "invalid_artifact",
            "Invalid backup artifact name",
        ),
        BackupError::ArtifactNotFound(_) => error_response(
            StatusCode::NOT_FOUND,
            trace_id,
            "artifact_not_found",
            "Backup artifact not found on device",
        ),
        BackupError::Device(e) if e.is_offline() => error_response(
            StatusCode::BAD_GATEWAY,
            trace_id,
            "connection_failed",
            "Could not connect to device",
        ),
        BackupError::CreationTimedOut => error_response(
            StatusCode::BAD_GATEWAY,
            trace_id,
            "backup_failed",
            "Backup artifact did not appear on device",
        ),
        e => {
            tracing::error!(error = %e, "Backup operation failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                trace_id,
                "backup_failed",
                "Backup operation failed",
            )
        }
    }
}

/// Create an on-device backup and return the artifact metadata. The
/// sequence is retried with bounded attempts on connection or creation
/// failure.
#[utoipa::path(
    post,
    path = "/v1/devices/{id}/backup",
    tag = "Backups",
    responses(
        (status = 200, description = "Backup artifact", body = BackupArtifact),
        (status = 404, description = "Unknown device", body = crate::api::ApiError),
        (status = 502, description = "Device offline or backup failed", body = crate::api::ApiError)
    )
)]
async fn create_backup(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let device = match load_device(&state, &id, &trace_id) {
        Ok(device) => device,
        Err(response) => return response,
    };
    let endpoint = match state.endpoint_for(&device) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            tracing::error!(device_id = %id, error = %e, "Failed to build endpoint");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Database error",
            );
        }
    };

    match state.orchestrator.backup(&endpoint, &device.name).await {
        Ok(artifact) => Json(artifact).into_response(),
        Err(e) => map_backup_error(e, &trace_id),
    }
}

/// Restore the device from a named on-device artifact and wait through
/// the reboot cycle. A device that does not reconnect within the wait
/// window yields a non-blocking warning outcome, not an error status.
#[utoipa::path(
    post,
    path = "/v1/devices/{id}/restore",
    tag = "Backups",
    request_body = RestoreRequest,
    responses(
        (status = 200, description = "Restore outcome", body = RestoreOutcome),
        (status = 400, description = "Invalid artifact name", body = crate::api::ApiError),
        (status = 404, description = "Unknown device or artifact", body = crate::api::ApiError),
        (status = 502, description = "Device offline", body = crate::api::ApiError)
    )
)]
async fn restore_backup(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RestoreRequest>,
) -> impl IntoResponse {
    let device = match load_device(&state, &id, &trace_id) {
        Ok(device) => device,
        Err(response) => return response,
    };
    let endpoint = match state.endpoint_for(&device) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            tracing::error!(device_id = %id, error = %e, "Failed to build endpoint");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Database error",
            );
        }
    };

    match state
        .orchestrator
        .restore(&endpoint, &request.artifact)
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => map_backup_error(e, &trace_id),
    }
}
