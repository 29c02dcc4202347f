use crate::config::ServerConfig;
use chrono::{DateTime, Utc};
use rosmon_alert::engine::AlertEngine;
use rosmon_common::types::DeviceMetricsSnapshot;
use rosmon_device::backup::BackupOrchestrator;
use rosmon_device::{DeviceConnector, DeviceEndpoint};
use rosmon_notify::manager::NotificationManager;
use rosmon_storage::registry::{DeviceRegistry, DeviceRow};
use rosmon_storage::MetricStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Process-wide context, constructed once at startup and passed by
/// reference to the poller, the alert loop, and the API layer. There is
/// no module-level mutable state anywhere else.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MetricStore>,
    pub registry: Arc<DeviceRegistry>,
    pub engine: Arc<Mutex<AlertEngine>>,
    pub notifier: Arc<NotificationManager>,
    pub connector: Arc<dyn DeviceConnector>,
    pub orchestrator: Arc<BackupOrchestrator>,
    /// Last snapshot per device, offline markers included. Snapshots are
    /// transient: they live here, never in the metric store.
    pub snapshots: Arc<Mutex<HashMap<String, DeviceMetricsSnapshot>>>,
    pub config: Arc<ServerConfig>,
    pub start_time: DateTime<Utc>,
}

impl AppState {
    /// Builds the connection endpoint for a device, decrypting its
    /// credential for this single attempt.
    pub fn endpoint_for(&self, device: &DeviceRow) -> anyhow::Result<DeviceEndpoint> {
        let secret = self
            .registry
            .device_secret(&device.id)?
            .ok_or_else(|| anyhow::anyhow!("No credential stored for device {}", device.id))?;
        Ok(DeviceEndpoint {
            address: device.address.clone(),
            username: device.username.clone(),
            secret,
            port: device.api_port,
            use_tls: device.use_tls,
            timeout: Duration::from_secs(self.config.poll.connect_timeout_secs),
        })
    }

    pub fn cache_snapshot(&self, device_id: &str, snapshot: DeviceMetricsSnapshot) {
        self.snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(device_id.to_string(), snapshot);
    }

    pub fn cached_snapshot(&self, device_id: &str) -> Option<DeviceMetricsSnapshot> {
        self.snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(device_id)
            .cloned()
    }

    pub fn forget_device(&self, device_id: &str) {
        self.snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(device_id);
        self.engine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove_device(device_id);
    }
}
