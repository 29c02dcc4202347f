use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One persisted time-series sample for a device metric.
///
/// Samples are append-only: once written they are never mutated, and they
/// are ordered by timestamp within a (device, type, name) partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub id: String,
    pub device_id: String,
    /// Metric category (e.g., `cpu`, `memory`, `disk`, `interface`).
    pub metric_type: String,
    /// Sub-dimension within the category (e.g., `load`, `usage`).
    pub metric_name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Metric (type, name) pairs the normalizer and poller actually produce.
/// Alert rule metric selectors must resolve to one of these.
pub const PRODUCED_METRICS: &[(&str, &str)] = &[
    ("cpu", "load"),
    ("memory", "usage"),
    ("disk", "usage"),
    ("temperature", "value"),
    ("interface", "running"),
    ("interface", "tx_bytes"),
    ("interface", "rx_bytes"),
];

/// True when the (type, name) selector names a produced metric.
pub fn is_produced_metric(metric_type: &str, metric_name: &str) -> bool {
    PRODUCED_METRICS
        .iter()
        .any(|(t, n)| *t == metric_type && *n == metric_name)
}

/// Alert severity level, ordered from lowest to highest.
///
/// # Examples
///
/// ```
/// use rosmon_common::types::Severity;
///
/// let sev: Severity = "warning".parse().unwrap();
/// assert_eq!(sev, Severity::Warning);
/// assert_eq!(sev.to_string(), "warning");
/// assert!(Severity::Critical > Severity::Info);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// A fired alert, persisted for history and acknowledgement.
///
/// Immutable once written except for the `acknowledged*` fields, which are
/// set exactly once when an operator acknowledges the alert.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AlertEvent {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub device_id: String,
    pub metric_type: String,
    pub metric_name: String,
    pub severity: Severity,
    /// Comparison operator the rule applied (`>`, `<`, `>=`, `<=`, `==`).
    pub operator: String,
    pub message: String,
    /// Observed value that triggered the alert.
    pub value: f64,
    pub threshold: f64,
    pub fired_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// Normalized in-memory result of polling a single device at a point in
/// time. Only selected fields are persisted as [`MetricSample`] rows.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DeviceMetricsSnapshot {
    pub online: bool,
    pub identity: String,
    pub model: String,
    pub version: String,
    pub architecture: String,
    pub cpu_count: u64,
    /// CPU load percentage (0-100).
    pub cpu_load: f64,
    pub cpu_frequency_mhz: u64,
    pub memory_total: u64,
    pub memory_used: u64,
    pub memory_usage: f64,
    pub disk_total: u64,
    pub disk_used: u64,
    pub disk_usage: f64,
    pub uptime_seconds: u64,
    /// Human-readable uptime (e.g., `"1d 1h 1m 1s"`).
    pub uptime: String,
    /// Board temperature in Celsius; `None` when the health endpoint is
    /// absent or lacks the field.
    pub temperature: Option<f64>,
    /// Generic failure message when `online` is false. Never contains
    /// internal error text or credentials.
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DeviceMetricsSnapshot {
    /// An offline snapshot carrying only a generic error message.
    pub fn offline(message: &str) -> Self {
        Self {
            online: false,
            identity: "Unknown".to_string(),
            model: "Unknown".to_string(),
            version: "Unknown".to_string(),
            architecture: "Unknown".to_string(),
            cpu_count: 0,
            cpu_load: 0.0,
            cpu_frequency_mhz: 0,
            memory_total: 0,
            memory_used: 0,
            memory_usage: 0.0,
            disk_total: 0,
            disk_used: 0,
            disk_usage: 0.0,
            uptime_seconds: 0,
            uptime: "Unknown".to_string(),
            temperature: None,
            error: Some(message.to_string()),
            timestamp: Utc::now(),
        }
    }
}

/// Normalized per-interface counters.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct InterfaceStats {
    pub name: String,
    pub interface_type: String,
    pub mac_address: String,
    pub enabled: bool,
    pub running: bool,
    pub tx_byte: u64,
    pub rx_byte: u64,
    pub tx_packet: u64,
    pub rx_packet: u64,
    pub tx_drop: u64,
    pub rx_drop: u64,
    pub tx_error: u64,
    pub rx_error: u64,
}

/// Aggregate totals over a set of interfaces.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct InterfaceTotals {
    pub count: usize,
    pub running: usize,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}

/// Result of one interface fetch: filtered interfaces plus totals when the
/// input was non-empty.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct InterfaceReport {
    pub interfaces: Vec<InterfaceStats>,
    pub totals: Option<InterfaceTotals>,
}

/// A wireless or CAPsMAN client registration.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct WirelessClient {
    pub mac_address: String,
    pub interface: String,
    pub signal_strength: String,
    pub tx_rate: String,
    pub rx_rate: String,
    pub uptime: String,
}

/// A DHCP server lease.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DhcpLease {
    pub mac_address: String,
    pub address: String,
    pub host_name: String,
    pub client_id: String,
    pub status: String,
}

/// Clients connected to a device, grouped by subsystem. Each list is empty
/// when the corresponding subsystem is absent on the device model.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ClientReport {
    pub wireless_clients: Vec<WirelessClient>,
    pub dhcp_clients: Vec<DhcpLease>,
    pub capsman_clients: Vec<WirelessClient>,
    pub timestamp: DateTime<Utc>,
}
