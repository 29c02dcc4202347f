use crate::api::error_response;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use rosmon_storage::MetricQuery;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MetricsParams {
    /// Device to query.
    pub device_id: String,
    /// Metric category filter (e.g., `cpu`).
    #[param(required = false)]
    pub metric_type: Option<String>,
    /// Metric name filter (e.g., `load`).
    #[param(required = false)]
    pub metric_name: Option<String>,
    /// Range start, Unix seconds. Defaults to 24 hours before `to`.
    #[param(required = false)]
    pub from: Option<i64>,
    /// Range end, Unix seconds. Defaults to now.
    #[param(required = false)]
    pub to: Option<i64>,
    /// Page size; clamped to the hard maximum of 1000.
    #[param(required = false)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MetricSampleResponse {
    pub device_id: String,
    pub metric_type: String,
    pub metric_name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(query_metrics))
}

/// Query historical metric samples. When the limit truncates, the newest
/// samples are kept; the page itself is ordered oldest-first.
#[utoipa::path(
    get,
    path = "/v1/metrics",
    tag = "Metrics",
    params(MetricsParams),
    responses(
        (status = 200, description = "Metric samples", body = Vec<MetricSampleResponse>)
    )
)]
async fn query_metrics(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<MetricsParams>,
) -> impl IntoResponse {
    let query = MetricQuery {
        device_id: params.device_id,
        metric_type: params.metric_type,
        metric_name: params.metric_name,
        from: params.from.and_then(|s| DateTime::from_timestamp(s, 0)),
        to: params.to.and_then(|s| DateTime::from_timestamp(s, 0)),
        limit: params.limit,
    };

    match state.store.query(&query) {
        Ok(samples) => {
            let items: Vec<MetricSampleResponse> = samples
                .into_iter()
                .map(|s| MetricSampleResponse {
                    device_id: s.device_id,
                    metric_type: s.metric_type,
                    metric_name: s.metric_name,
                    value: s.value,
                    timestamp: s.timestamp,
                })
                .collect();
            Json(items).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Metric query failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Database error",
            )
        }
    }
}
