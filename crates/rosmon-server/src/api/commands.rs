use crate::api::error_response;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use rosmon_device::command::{self, CommandError};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Query results larger than this are truncated.
const MAX_RESULT_ITEMS: usize = 1000;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CommandRequest {
    /// CLI-style read-only command, e.g. `/ip/firewall/nat/print`.
    pub command: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CommandResponse {
    pub path: String,
    pub action: String,
    #[schema(value_type = Object)]
    pub result: serde_json::Value,
    pub truncated: bool,
}

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(run_command))
}

/// Run a read-only query command against a device. Commands matching the
/// deny list are rejected outright — a security rejection is never
/// retried or degraded.
#[utoipa::path(
    post,
    path = "/v1/devices/{id}/command",
    tag = "Devices",
    request_body = CommandRequest,
    responses(
        (status = 200, description = "Query result", body = CommandResponse),
        (status = 400, description = "Malformed command", body = crate::api::ApiError),
        (status = 403, description = "Command denied", body = crate::api::ApiError),
        (status = 404, description = "Unknown device", body = crate::api::ApiError),
        (status = 502, description = "Device offline", body = crate::api::ApiError)
    )
)]
async fn run_command(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CommandRequest>,
) -> impl IntoResponse {
    let parsed = match command::validate_command(&request.command) {
        Ok(parsed) => parsed,
        Err(CommandError::Denied) => {
            tracing::warn!(device_id = %id, "Blocked deny-listed command");
            return error_response(
                StatusCode::FORBIDDEN,
                &trace_id,
                "command_denied",
                "Command is not allowed for security reasons",
            );
        }
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &trace_id,
                "invalid_command",
                &e.to_string(),
            );
        }
    };

    let device = match state.registry.get_device(&id) {
        Ok(Some(device)) => device,
        Ok(None) => {
            return error_response(
                StatusCode::NOT_FOUND,
                &trace_id,
                "not_found",
                "Unknown device",
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to load device");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Database error",
            );
        }
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

    let client = match state.connector.connect(&endpoint).await {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(device_id = %id, error = %e, "Device offline");
            return error_response(
                StatusCode::BAD_GATEWAY,
                &trace_id,
                "connection_failed",
                "Could not connect to device",
            );
        }
    };

    match client.run_query(&parsed.path).await {
        Ok(mut result) => {
            let mut truncated = false;
            if let serde_json::Value::Array(items) = &mut result {
                if items.len() > MAX_RESULT_ITEMS {
                    items.truncate(MAX_RESULT_ITEMS);
                    truncated = true;
                }
            }
            Json(CommandResponse {
                path: parsed.path,
                action: parsed.action,
                result,
                truncated,
            })
            .into_response()
        }
        Err(e) => {
            tracing::warn!(device_id = %id, error = %e, "Command query failed");
            error_response(
                StatusCode::BAD_GATEWAY,
                &trace_id,
                "command_failed",
                "Error executing command",
            )
        }
    }
}
