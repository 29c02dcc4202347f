//! Persistence layer: time-series metric storage and the device/rule
//! registry.
//!
//! Metrics and alert events live in daily time-partitioned SQLite
//! databases with WAL mode ([`engine::SqliteMetricStore`]). Device
//! records, alert rules, and the encrypted credentials live in a single
//! registry database ([`registry::DeviceRegistry`]).

pub mod engine;
pub mod partition;
pub mod registry;
pub mod secret;

#[cfg(test)]
mod tests;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rosmon_common::types::{AlertEvent, MetricSample};

/// Default page size for metric queries.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Hard upper bound on a metric query page, enforced regardless of the
/// caller-supplied limit.
pub const MAX_QUERY_LIMIT: usize = 1000;

/// Clamps a caller-supplied limit into `[1, MAX_QUERY_LIMIT]`, defaulting
/// to [`DEFAULT_QUERY_LIMIT`].
pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_QUERY_LIMIT).clamp(1, MAX_QUERY_LIMIT)
}

/// Parameters for a time-range metric query scoped to one device.
///
/// `from`/`to` default to the last 24 hours. When the limit truncates the
/// result, the newest samples are selected; the returned page is ordered
/// oldest-first.
#[derive(Debug, Clone)]
pub struct MetricQuery {
    pub device_id: String,
    pub metric_type: Option<String>,
    pub metric_name: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Persistence backend for metric samples and alert events.
///
/// Implementations must be `Send + Sync`: the store is shared between the
/// poll loop, the alert loop, and the REST API.
pub trait MetricStore: Send + Sync {
    /// Appends a batch of samples from one completed poll.
    fn append_batch(&self, samples: &[MetricSample]) -> Result<()>;

    /// Queries samples; see [`MetricQuery`] for paging semantics.
    fn query(&self, query: &MetricQuery) -> Result<Vec<MetricSample>>;

    /// Persists a fired alert event.
    fn write_alert_event(&self, event: &AlertEvent) -> Result<()>;

    /// Queries historical alert events, newest first.
    fn query_alert_history(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        device_id: Option<&str>,
        acknowledged: Option<bool>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AlertEvent>>;

    /// Acknowledges an alert exactly once. Returns false when the event
    /// does not exist or was already acknowledged.
    fn acknowledge_alert(&self, event_id: &str, actor: &str) -> Result<bool>;

    /// Removes partitions older than `retention_days`; returns the number
    /// removed.
    fn cleanup(&self, retention_days: u32) -> Result<u32>;

    /// Returns partition (daily database) information.
    fn list_partitions(&self) -> Result<Vec<PartitionInfo>>;
}

/// Information about a storage partition (daily SQLite database).
#[derive(Debug, Clone, serde::Serialize)]
pub struct PartitionInfo {
    pub date: String,
    pub size_bytes: u64,
    pub path: String,
}
