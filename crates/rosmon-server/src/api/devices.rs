use crate::api::error_response;
use crate::logging::TraceId;
use crate::poller;
use crate::state::AppState;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use rosmon_common::types::ClientReport;
use rosmon_device::normalize::{self, DEFAULT_INTERFACE_TYPES};
use rosmon_device::DeviceEndpoint;
use rosmon_storage::registry::{DeviceRow, NewDevice, UpdateDevice};
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Device record as exposed over the API. The credential never appears.
#[derive(Debug, Serialize, ToSchema)]
pub struct DeviceResponse {
    pub id: String,
    pub name: String,
    pub address: String,
    pub username: String,
    pub api_port: u16,
    pub use_tls: bool,
    pub model: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DeviceRow> for DeviceResponse {
    fn from(row: DeviceRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            address: row.address,
            username: row.username,
            api_port: row.api_port,
            use_tls: row.use_tls,
            model: row.model,
            location: row.location,
            notes: row.notes,
            enabled: row.enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateDeviceRequest {
    pub name: String,
    pub address: String,
    pub username: String,
    /// API credential; stored encrypted, never returned.
    pub secret: String,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_true")]
    pub use_tls: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateDeviceRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub api_port: Option<u16>,
    #[serde(default)]
    pub use_tls: Option<bool>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

fn default_api_port() -> u16 {
    443
}

fn default_true() -> bool {
    true
}

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_devices, create_device))
        .routes(routes!(get_device, update_device, delete_device))
        .routes(routes!(device_snapshot))
        .routes(routes!(device_interfaces))
        .routes(routes!(device_clients))
}

/// List all registered devices.
#[utoipa::path(
    get,
    path = "/v1/devices",
    tag = "Devices",
    responses(
        (status = 200, description = "Registered devices", body = Vec<DeviceResponse>)
    )
)]
async fn list_devices(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match state.registry.list_devices(false) {
        Ok(devices) => {
            let items: Vec<DeviceResponse> = devices.into_iter().map(Into::into).collect();
            Json(items).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to list devices");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Database error",
            )
        }
    }
}

/// Register a device. Creation requires a successful live connection
/// test against the supplied endpoint.
#[utoipa::path(
    post,
    path = "/v1/devices",
    tag = "Devices",
    request_body = CreateDeviceRequest,
    responses(
        (status = 201, description = "Device created", body = DeviceResponse),
        (status = 400, description = "Validation failed", body = crate::api::ApiError),
        (status = 502, description = "Connection test failed", body = crate::api::ApiError)
    )
)]
async fn create_device(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(request): Json<CreateDeviceRequest>,
) -> impl IntoResponse {
    let endpoint = DeviceEndpoint {
        address: request.address.clone(),
        username: request.username.clone(),
        secret: request.secret.clone(),
        port: request.api_port,
        use_tls: request.use_tls,
        timeout: Duration::from_secs(state.config.poll.connect_timeout_secs),
    };

    if let Err(e) = state.connector.connect(&endpoint).await {
        tracing::warn!(address = %request.address, error = %e, "Device connection test failed");
        return error_response(
            StatusCode::BAD_GATEWAY,
            &trace_id,
            "connection_failed",
            "Could not connect to device",
        );
    }

    let new = NewDevice {
        name: request.name,
        address: request.address,
        username: request.username,
        secret: request.secret,
        api_port: request.api_port,
        use_tls: request.use_tls,
        model: request.model,
        location: request.location,
        notes: request.notes,
        enabled: request.enabled,
    };

    match state.registry.insert_device(&new) {
        Ok(device) => {
            (StatusCode::CREATED, Json(DeviceResponse::from(device))).into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "Device creation rejected");
            error_response(
                StatusCode::BAD_REQUEST,
                &trace_id,
                "validation_failed",
                &e.to_string(),
            )
        }
    }
}

/// Get one device.
#[utoipa::path(
    get,
    path = "/v1/devices/{id}",
    tag = "Devices",
    responses(
        (status = 200, description = "Device", body = DeviceResponse),
        (status = 404, description = "Unknown device", body = crate::api::ApiError)
    )
)]
async fn get_device(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.get_device(&id) {
        Ok(Some(device)) => Json(DeviceResponse::from(device)).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "not_found",
            "Unknown device",
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to load device");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Database error",
            )
        }
    }
}

/// Update a device. Connection-relevant changes (address, credentials,
/// port, transport) are re-validated with a live connection test.
#[utoipa::path(
    put,
    path = "/v1/devices/{id}",
    tag = "Devices",
    request_body = UpdateDeviceRequest,
    responses(
        (status = 200, description = "Updated device", body = DeviceResponse),
        (status = 400, description = "Validation failed", body = crate::api::ApiError),
        (status = 404, description = "Unknown device", body = crate::api::ApiError),
        (status = 502, description = "Connection test failed", body = crate::api::ApiError)
    )
)]
async fn update_device(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateDeviceRequest>,
) -> impl IntoResponse {
    let existing = match state.registry.get_device(&id) {
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

    let update = UpdateDevice {
        name: request.name,
        address: request.address,
        username: request.username,
        secret: request.secret,
        api_port: request.api_port,
        use_tls: request.use_tls,
        model: request.model,
        location: request.location,
        notes: request.notes,
        enabled: request.enabled,
    };

    if update.connection_relevant() {
        let secret = match &update.secret {
            Some(secret) => secret.clone(),
            None => match state.registry.device_secret(&id) {
                Ok(Some(secret)) => secret,
                _ => {
                    return error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        &trace_id,
                        "storage_error",
                        "Database error",
                    )
                }
            },
        };
        let endpoint = DeviceEndpoint {
            address: update.address.clone().unwrap_or(existing.address.clone()),
            username: update.username.clone().unwrap_or(existing.username.clone()),
            secret,
            port: update.api_port.unwrap_or(existing.api_port),
            use_tls: update.use_tls.unwrap_or(existing.use_tls),
            timeout: Duration::from_secs(state.config.poll.connect_timeout_secs),
        };
        if let Err(e) = state.connector.connect(&endpoint).await {
            tracing::warn!(device_id = %id, error = %e, "Device connection re-test failed");
            return error_response(
                StatusCode::BAD_GATEWAY,
                &trace_id,
                "connection_failed",
                "Could not connect to device",
            );
        }
    }

    match state.registry.update_device(&id, &update) {
        Ok(Some(device)) => Json(DeviceResponse::from(device)).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "not_found",
            "Unknown device",
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Device update rejected");
            error_response(
                StatusCode::BAD_REQUEST,
                &trace_id,
                "validation_failed",
                &e.to_string(),
            )
        }
    }
}

/// Delete a device and everything tied to it (rules targeting it,
/// tracked alert state, cached snapshot).
#[utoipa::path(
    delete,
    path = "/v1/devices/{id}",
    tag = "Devices",
    responses(
        (status = 204, description = "Device deleted"),
        (status = 404, description = "Unknown device", body = crate::api::ApiError)
    )
)]
async fn delete_device(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.delete_device(&id) {
        Ok(true) => {
            state.forget_device(&id);
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "not_found",
            "Unknown device",
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to delete device");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Database error",
            )
        }
    }
}

/// Live-poll one device and return the normalized snapshot. An offline
/// device answers `online: false` with a generic error, not a failure
/// status.
#[utoipa::path(
    get,
    path = "/v1/devices/{id}/snapshot",
    tag = "Devices",
    responses(
        (status = 200, description = "Normalized snapshot", body = rosmon_common::types::DeviceMetricsSnapshot),
        (status = 404, description = "Unknown device", body = crate::api::ApiError)
    )
)]
async fn device_snapshot(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
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

    let timeout = Duration::from_secs(state.config.poll.poll_timeout_secs);
    let snapshot = match tokio::time::timeout(timeout, poller::poll_device(&state, &device)).await {
        Ok(Ok((snapshot, _))) => snapshot,
        Ok(Err(e)) => {
            tracing::warn!(device_id = %id, error = %e, "On-demand poll failed");
            rosmon_common::types::DeviceMetricsSnapshot::offline("Connection failed")
        }
        Err(_) => {
            tracing::warn!(device_id = %id, "On-demand poll timed out");
            rosmon_common::types::DeviceMetricsSnapshot::offline("Connection timed out")
        }
    };

    state.cache_snapshot(&id, snapshot.clone());
    Json(snapshot).into_response()
}

/// Fetch and normalize the device's interface counters.
#[utoipa::path(
    get,
    path = "/v1/devices/{id}/interfaces",
    tag = "Devices",
    responses(
        (status = 200, description = "Interface report", body = rosmon_common::types::InterfaceReport),
        (status = 404, description = "Unknown device", body = crate::api::ApiError),
        (status = 502, description = "Device offline", body = crate::api::ApiError)
    )
)]
async fn device_interfaces(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
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

    match state.connector.connect(&endpoint).await {
        Ok(client) => match client.fetch_interfaces(None).await {
            Ok(interfaces) => {
                let report = normalize::normalize_interfaces(&interfaces, DEFAULT_INTERFACE_TYPES);
                Json(report).into_response()
            }
            Err(e) => {
                tracing::warn!(device_id = %id, error = %e, "Interface fetch failed");
                error_response(
                    StatusCode::BAD_GATEWAY,
                    &trace_id,
                    "connection_failed",
                    "Could not fetch interfaces",
                )
            }
        },
        Err(e) => {
            tracing::warn!(device_id = %id, error = %e, "Device offline");
            error_response(
                StatusCode::BAD_GATEWAY,
                &trace_id,
                "connection_failed",
                "Could not connect to device",
            )
        }
    }
}

/// Fetch the clients connected to a device. Missing subsystems
/// (wireless, CAPsMAN, DHCP) yield empty lists.
#[utoipa::path(
    get,
    path = "/v1/devices/{id}/clients",
    tag = "Devices",
    responses(
        (status = 200, description = "Connected clients", body = ClientReport),
        (status = 404, description = "Unknown device", body = crate::api::ApiError),
        (status = 502, description = "Device offline", body = crate::api::ApiError)
    )
)]
async fn device_clients(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
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

    let wireless = client.fetch_wireless_clients().await.unwrap_or_default();
    let leases = client.fetch_dhcp_leases().await.unwrap_or_default();
    let capsman = client.fetch_capsman_clients().await.unwrap_or_default();

    let report = ClientReport {
        wireless_clients: normalize::normalize_wireless(&wireless),
        dhcp_clients: normalize::normalize_leases(&leases),
        capsman_clients: normalize::normalize_wireless(&capsman),
        timestamp: Utc::now(),
    };
    Json(report).into_response()
}
