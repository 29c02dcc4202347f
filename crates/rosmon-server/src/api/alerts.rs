use crate::api::error_response;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use rosmon_common::types::AlertEvent;
use rosmon_storage::registry::{AlertRuleRow, NewAlertRule, UpdateAlertRule};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListAlertsParams {
    /// Device filter.
    #[param(required = false)]
    pub device_id: Option<String>,
    /// Acknowledgement state filter.
    #[param(required = false)]
    pub acknowledged: Option<bool>,
    /// Range start, Unix seconds. Defaults to 24 hours ago.
    #[param(required = false)]
    pub from: Option<i64>,
    /// Range end, Unix seconds. Defaults to now.
    #[param(required = false)]
    pub to: Option<i64>,
    #[param(required = false)]
    pub limit: Option<usize>,
    #[param(required = false)]
    pub offset: Option<usize>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AckRequest {
    /// Who acknowledges the alert.
    pub actor: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AckResponse {
    pub id: String,
    pub acknowledged: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AlertRuleResponse {
    pub id: String,
    pub name: String,
    pub device_pattern: String,
    pub metric_type: String,
    pub metric_name: String,
    pub operator: String,
    pub threshold: f64,
    pub duration_secs: u64,
    pub severity: String,
    pub enabled: bool,
    pub notify_email: bool,
    pub notify_telegram: bool,
    pub email_recipients: String,
    pub message_template: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<AlertRuleRow> for AlertRuleResponse {
    fn from(row: AlertRuleRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            device_pattern: row.device_pattern,
            metric_type: row.metric_type,
            metric_name: row.metric_name,
            operator: row.operator,
            threshold: row.threshold,
            duration_secs: row.duration_secs,
            severity: row.severity,
            enabled: row.enabled,
            notify_email: row.notify_email,
            notify_telegram: row.notify_telegram,
            email_recipients: row.email_recipients,
            message_template: row.message_template,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRuleRequest {
    pub name: String,
    /// Exact device id or glob pattern; defaults to all devices.
    #[serde(default = "default_device_pattern")]
    pub device_pattern: String,
    pub metric_type: String,
    pub metric_name: String,
    /// One of `>`, `<`, `>=`, `<=`, `==`.
    pub operator: String,
    pub threshold: f64,
    #[serde(default)]
    pub duration_secs: u64,
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub notify_email: bool,
    #[serde(default)]
    pub notify_telegram: bool,
    /// Comma-separated email recipients.
    #[serde(default)]
    pub email_recipients: String,
    #[serde(default)]
    pub message_template: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateRuleRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub device_pattern: Option<String>,
    #[serde(default)]
    pub metric_type: Option<String>,
    #[serde(default)]
    pub metric_name: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub duration_secs: Option<u64>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub notify_email: Option<bool>,
    #[serde(default)]
    pub notify_telegram: Option<bool>,
    #[serde(default)]
    pub email_recipients: Option<String>,
    #[serde(default)]
    pub message_template: Option<String>,
}

fn default_device_pattern() -> String {
    "*".to_string()
}

fn default_severity() -> String {
    "warning".to_string()
}

fn default_true() -> bool {
    true
}

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_alerts))
        .routes(routes!(ack_alert))
        .routes(routes!(list_rules, create_rule))
        .routes(routes!(update_rule, delete_rule))
}

/// Query alert history, newest first.
#[utoipa::path(
    get,
    path = "/v1/alerts",
    tag = "Alerts",
    params(ListAlertsParams),
    responses(
        (status = 200, description = "Alert history", body = Vec<AlertEvent>)
    )
)]
async fn list_alerts(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<ListAlertsParams>,
) -> impl IntoResponse {
    let to = params
        .to
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .unwrap_or_else(Utc::now);
    let from = params
        .from
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .unwrap_or(to - Duration::hours(24));
    let limit = rosmon_storage::clamp_limit(params.limit);
    let offset = params.offset.unwrap_or(0);

    match state.store.query_alert_history(
        from,
        to,
        params.device_id.as_deref(),
        params.acknowledged,
        limit,
        offset,
    ) {
        Ok(alerts) => Json(alerts).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Alert history query failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Database error",
            )
        }
    }
}

/// Acknowledge an alert. Acknowledgement is recorded exactly once with
/// actor and time; a second call is a no-op reported as 404.
#[utoipa::path(
    post,
    path = "/v1/alerts/{id}/ack",
    tag = "Alerts",
    request_body = AckRequest,
    responses(
        (status = 200, description = "Alert acknowledged", body = AckResponse),
        (status = 404, description = "Unknown or already acknowledged", body = crate::api::ApiError)
    )
)]
async fn ack_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AckRequest>,
) -> impl IntoResponse {
    match state.store.acknowledge_alert(&id, &request.actor) {
        Ok(true) => Json(AckResponse {
            id,
            acknowledged: true,
        })
        .into_response(),
        Ok(false) => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "not_found",
            "Unknown alert or already acknowledged",
        ),
        Err(e) => {
            tracing::error!(error = %e, "Alert acknowledgement failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Database error",
            )
        }
    }
}

/// List alert rules.
#[utoipa::path(
    get,
    path = "/v1/alerts/rules",
    tag = "Alerts",
    responses(
        (status = 200, description = "Alert rules", body = Vec<AlertRuleResponse>)
    )
)]
async fn list_rules(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match state.registry.list_alert_rules(false) {
        Ok(rules) => {
            let items: Vec<AlertRuleResponse> = rules.into_iter().map(Into::into).collect();
            Json(items).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to list alert rules");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Database error",
            )
        }
    }
}

/// Create an alert rule. The operator and metric selector are validated
/// against the closed sets; invalid rules are rejected, never persisted.
#[utoipa::path(
    post,
    path = "/v1/alerts/rules",
    tag = "Alerts",
    request_body = CreateRuleRequest,
    responses(
        (status = 201, description = "Rule created", body = AlertRuleResponse),
        (status = 400, description = "Validation failed", body = crate::api::ApiError)
    )
)]
async fn create_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(request): Json<CreateRuleRequest>,
) -> impl IntoResponse {
    let new = NewAlertRule {
        name: request.name,
        device_pattern: request.device_pattern,
        metric_type: request.metric_type,
        metric_name: request.metric_name,
        operator: request.operator,
        threshold: request.threshold,
        duration_secs: request.duration_secs,
        severity: request.severity,
        enabled: request.enabled,
        notify_email: request.notify_email,
        notify_telegram: request.notify_telegram,
        email_recipients: request.email_recipients,
        message_template: request.message_template,
    };

    match state.registry.insert_alert_rule(&new) {
        Ok(rule) => (StatusCode::CREATED, Json(AlertRuleResponse::from(rule))).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Alert rule rejected");
            error_response(
                StatusCode::BAD_REQUEST,
                &trace_id,
                "validation_failed",
                &e.to_string(),
            )
        }
    }
}

/// Update an alert rule. Tracked breach state for the rule is discarded,
/// so an edited rule behaves like a newly created one.
#[utoipa::path(
    put,
    path = "/v1/alerts/rules/{id}",
    tag = "Alerts",
    request_body = UpdateRuleRequest,
    responses(
        (status = 200, description = "Updated rule", body = AlertRuleResponse),
        (status = 400, description = "Validation failed", body = crate::api::ApiError),
        (status = 404, description = "Unknown rule", body = crate::api::ApiError)
    )
)]
async fn update_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateRuleRequest>,
) -> impl IntoResponse {
    let update = UpdateAlertRule {
        name: request.name,
        device_pattern: request.device_pattern,
        metric_type: request.metric_type,
        metric_name: request.metric_name,
        operator: request.operator,
        threshold: request.threshold,
        duration_secs: request.duration_secs,
        severity: request.severity,
        enabled: request.enabled,
        notify_email: request.notify_email,
        notify_telegram: request.notify_telegram,
        email_recipients: request.email_recipients,
        message_template: request.message_template,
    };

    match state.registry.update_alert_rule(&id, &update) {
        Ok(Some(rule)) => {
            state
                .engine
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove_rule(&id);
            Json(AlertRuleResponse::from(rule)).into_response()
        }
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "not_found",
            "Unknown rule",
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Alert rule update rejected");
            error_response(
                StatusCode::BAD_REQUEST,
                &trace_id,
                "validation_failed",
                &e.to_string(),
            )
        }
    }
}

/// Delete an alert rule and discard its tracked state.
#[utoipa::path(
    delete,
    path = "/v1/alerts/rules/{id}",
    tag = "Alerts",
    responses(
        (status = 204, description = "Rule deleted"),
        (status = 404, description = "Unknown rule", body = crate::api::ApiError)
    )
)]
async fn delete_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.delete_alert_rule(&id) {
        Ok(true) => {
            state
                .engine
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove_rule(&id);
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "not_found",
            "Unknown rule",
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to delete alert rule");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Database error",
            )
        }
    }
}
