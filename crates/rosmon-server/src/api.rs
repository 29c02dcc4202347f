pub mod alerts;
pub mod backups;
pub mod commands;
pub mod devices;
pub mod metrics;
pub mod system;

use crate::state::AppState;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{middleware, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::{OpenApi, ToSchema};
use utoipa_axum::router::OpenApiRouter;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "rosmon API",
        description = "RouterOS device monitoring REST API",
    ),
    tags(
        (name = "System", description = "Service health"),
        (name = "Devices", description = "Device registry and live views"),
        (name = "Metrics", description = "Historical metric queries"),
        (name = "Alerts", description = "Alert rules and history"),
        (name = "Backups", description = "Device backup and restore")
    )
)]
struct ApiDoc;

/// Error payload returned by every non-2xx response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    pub trace_id: String,
    pub code: String,
    /// Generic, user-safe message. Never internal error text.
    pub message: String,
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, message: &str) -> Response {
    (
        status,
        Json(ApiError {
            trace_id: trace_id.to_string(),
            code: code.to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

pub fn build_router(state: AppState) -> Router {
    let (router, spec) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .merge(system::routes())
        .merge(devices::routes())
        .merge(commands::routes())
        .merge(metrics::routes())
        .merge(alerts::routes())
        .merge(backups::routes())
        .split_for_parts();

    let spec = Arc::new(spec);
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router
        .route(
            "/v1/openapi.json",
            axum::routing::get(move || {
                let spec = spec.clone();
                async move { Json(spec.as_ref().clone()) }
            }),
        )
        .with_state(state)
        .layer(cors)
        .layer(middleware::from_fn(crate::logging::request_logging))
}
