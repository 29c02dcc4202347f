use crate::state::AppState;
use anyhow::Result;
use chrono::Utc;
use rosmon_common::types::{DeviceMetricsSnapshot, InterfaceReport, MetricSample};
use rosmon_device::normalize::{self, DEFAULT_INTERFACE_TYPES};
use rosmon_storage::registry::DeviceRow;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Drives the periodic metrics poll across all enabled devices.
///
/// Per round, devices are dispatched to a semaphore-bounded set of tasks;
/// at most one poll per device is ever in flight (a tick that finds a
/// device still busy drops it for the round). A single device's failure
/// or timeout never aborts the round.
pub struct PollScheduler {
    state: AppState,
    interval: Duration,
    poll_timeout: Duration,
    max_concurrent: usize,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl PollScheduler {
    pub fn new(state: AppState) -> Self {
        let interval = Duration::from_secs(state.config.poll.interval_secs);
        let poll_timeout = Duration::from_secs(state.config.poll.poll_timeout_secs);
        let max_concurrent = state.config.poll.max_concurrent.max(1);
        Self {
            state,
            interval,
            poll_timeout,
            max_concurrent,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn run(&self) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            max_concurrent = self.max_concurrent,
            "Metrics poll scheduler started"
        );

        loop {
            let started = Instant::now();
            if let Err(e) = self.poll_round().await {
                tracing::error!(error = %e, "Poll round failed");
            }
            let elapsed = started.elapsed();
            if elapsed >= self.interval {
                // Overrunning round: start the next one immediately
                // instead of queueing missed ticks.
                tracing::warn!(
                    elapsed_secs = elapsed.as_secs(),
                    interval_secs = self.interval.as_secs(),
                    "Poll round overran the interval"
                );
            } else {
                tokio::time::sleep(self.interval - elapsed).await;
            }
        }
    }

    /// Executes one poll round. Public so tests can drive rounds without
    /// the timing loop.
    pub async fn poll_round(&self) -> Result<()> {
        let devices = self.state.registry.list_devices(true)?;
        if devices.is_empty() {
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::new();

        for device in devices {
            {
                let mut in_flight = self
                    .in_flight
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if !in_flight.insert(device.id.clone()) {
                    tracing::warn!(
                        device_id = %device.id,
                        device = %device.name,
                        "Previous poll still in flight, dropping this tick"
                    );
                    continue;
                }
            }

            let permit = semaphore.clone().acquire_owned().await?;
            let state = self.state.clone();
            let in_flight = self.in_flight.clone();
            let poll_timeout = self.poll_timeout;

            let handle = tokio::spawn(async move {
                let outcome = tokio::time::timeout(poll_timeout, poll_device(&state, &device)).await;

                let (snapshot, interfaces) = match outcome {
                    Ok(Ok((snapshot, interfaces))) => (snapshot, Some(interfaces)),
                    Ok(Err(e)) => {
                        // Internal detail stays in the log; callers see a
                        // generic offline marker.
                        tracing::warn!(
                            device_id = %device.id,
                            device = %device.name,
                            error = %e,
                            "Device poll failed"
                        );
                        (DeviceMetricsSnapshot::offline("Connection failed"), None)
                    }
                    Err(_) => {
                        tracing::warn!(
                            device_id = %device.id,
                            device = %device.name,
                            timeout_secs = poll_timeout.as_secs(),
                            "Device poll timed out, abandoning"
                        );
                        (DeviceMetricsSnapshot::offline("Connection timed out"), None)
                    }
                };

                if snapshot.online {
                    let mut samples = samples_from_snapshot(&device.id, &snapshot);
                    if let Some(report) = &interfaces {
                        samples.extend(samples_from_interfaces(
                            &device.id,
                            report,
                            snapshot.timestamp,
                        ));
                    }
                    if let Err(e) = state.store.append_batch(&samples) {
                        tracing::error!(
                            device_id = %device.id,
                            error = %e,
                            "Failed to persist metric samples"
                        );
                    }
                }
                state.cache_snapshot(&device.id, snapshot);

                in_flight
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .remove(&device.id);
                drop(permit);
            });

            handles.push(handle);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Poll task panicked");
            }
        }

        Ok(())
    }
}

/// Polls one device: connect, fetch resource/identity/health/interfaces,
/// normalize. Health and interface absence degrade; only a connection
/// failure makes the whole poll fail.
pub async fn poll_device(
    state: &AppState,
    device: &DeviceRow,
) -> anyhow::Result<(DeviceMetricsSnapshot, InterfaceReport)> {
    let endpoint = state.endpoint_for(device)?;
    let client = state.connector.connect(&endpoint).await?;

    let resource = client.fetch_resource().await?;
    let identity = client.fetch_identity().await?;
    let health = match client.fetch_health().await {
        Ok(health) => health,
        Err(e) => {
            tracing::debug!(device_id = %device.id, error = %e, "Health fetch degraded");
            None
        }
    };
    let interfaces = match client.fetch_interfaces(None).await {
        Ok(interfaces) => interfaces,
        Err(e) => {
            tracing::debug!(device_id = %device.id, error = %e, "Interface fetch degraded");
            Vec::new()
        }
    };

    let snapshot = normalize::normalize_snapshot(&resource, &identity, health.as_ref());
    let report = normalize::normalize_interfaces(&interfaces, DEFAULT_INTERFACE_TYPES);
    Ok((snapshot, report))
}

/// Projects the persisted metric samples out of a completed snapshot.
/// The selection matches `rosmon_common::types::PRODUCED_METRICS`.
pub fn samples_from_snapshot(device_id: &str, snapshot: &DeviceMetricsSnapshot) -> Vec<MetricSample> {
    let ts = snapshot.timestamp;
    let mut samples = vec![
        sample(device_id, "cpu", "load", snapshot.cpu_load, ts),
        sample(device_id, "memory", "usage", snapshot.memory_usage, ts),
        sample(device_id, "disk", "usage", snapshot.disk_usage, ts),
    ];
    if let Some(temperature) = snapshot.temperature {
        samples.push(sample(device_id, "temperature", "value", temperature, ts));
    }
    samples
}

/// Interface aggregate samples, appended when an interface report is
/// available for the poll.
pub fn samples_from_interfaces(
    device_id: &str,
    report: &InterfaceReport,
    ts: chrono::DateTime<Utc>,
) -> Vec<MetricSample> {
    match &report.totals {
        Some(totals) => vec![
            sample(device_id, "interface", "running", totals.running as f64, ts),
            sample(device_id, "interface", "tx_bytes", totals.tx_bytes as f64, ts),
            sample(device_id, "interface", "rx_bytes", totals.rx_bytes as f64, ts),
        ],
        None => Vec::new(),
    }
}

fn sample(
    device_id: &str,
    metric_type: &str,
    metric_name: &str,
    value: f64,
    timestamp: chrono::DateTime<Utc>,
) -> MetricSample {
    MetricSample {
        id: rosmon_common::id::next_id(),
        device_id: device_id.to_string(),
        metric_type: metric_type.to_string(),
        metric_name: metric_name.to_string(),
        value,
        timestamp,
    }
}
