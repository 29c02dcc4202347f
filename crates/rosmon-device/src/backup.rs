//! Backup and restore orchestration.
//!
//! Both sequences run against a fresh connection per attempt, with a
//! bounded [`RetryPolicy`] instead of open-ended sleep loops. Waiting is
//! delegated to a [`Sleeper`] so tests run without wall-clock delays.

use crate::error::DeviceError;
use crate::{DeviceClient, DeviceConnector, DeviceEndpoint};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// Artifact names are restricted to a safe character set.
    #[error("invalid artifact name: {0}")]
    InvalidArtifactName(String),

    /// Restore requires the named artifact to exist on the device.
    #[error("artifact not found on device: {0}")]
    ArtifactNotFound(String),

    /// No backup artifact appeared within the bounded wait.
    #[error("backup artifact did not appear within the wait window")]
    CreationTimedOut,

    #[error("operation failed after {0} attempts")]
    AttemptsExhausted(u32),
}

/// Bounded retry with a fixed backoff between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Abstraction over waiting so orchestration timing is deterministic in
/// tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// Total bounded wait for the artifact to appear.
    pub wait_timeout: Duration,
    /// Fixed interval between artifact polls.
    pub poll_interval: Duration,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Bounded wait for the device to drop offline after the restore
    /// command.
    pub offline_wait: Duration,
    /// Bounded wait for the device to come back online.
    pub online_wait: Duration,
    /// Interval between connection probes.
    pub probe_interval: Duration,
    /// Per-probe connection timeout.
    pub probe_timeout: Duration,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            offline_wait: Duration::from_secs(30),
            online_wait: Duration::from_secs(120),
            probe_interval: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(3),
        }
    }
}

/// Metadata for a backup artifact located on the device.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct BackupArtifact {
    pub name: String,
    pub size: u64,
    /// Device-local creation time string.
    pub created: String,
}

/// Result of a restore sequence. `completed: false` with a warning is a
/// non-blocking outcome: the device accepted the restore but was not seen
/// back online within the wait window.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct RestoreOutcome {
    pub completed: bool,
    pub warning: Option<String>,
    pub version_before: Option<String>,
    pub version_after: Option<String>,
}

/// Reduces a device name to the safe artifact charset `[A-Za-z0-9_-]`.
pub fn sanitize_artifact_name(device_name: &str) -> String {
    device_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn valid_artifact_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

fn probe_count(wait: Duration, interval: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    ((wait.as_millis() / interval_ms) as u32).max(1)
}

pub struct BackupOrchestrator {
    connector: Arc<dyn DeviceConnector>,
    retry: RetryPolicy,
    backup_opts: BackupOptions,
    restore_opts: RestoreOptions,
    sleeper: Arc<dyn Sleeper>,
}

impl BackupOrchestrator {
    pub fn new(
        connector: Arc<dyn DeviceConnector>,
        retry: RetryPolicy,
        backup_opts: BackupOptions,
        restore_opts: RestoreOptions,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            connector,
            retry,
            backup_opts,
            restore_opts,
            sleeper,
        }
    }

    /// Creates an on-device backup and returns the located artifact.
    /// The whole connect/create/locate sequence is retried per policy.
    pub async fn backup(
        &self,
        endpoint: &DeviceEndpoint,
        device_name: &str,
    ) -> Result<BackupArtifact, BackupError> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let artifact_name = format!("{}_{}", sanitize_artifact_name(device_name), stamp);

        let mut last_err: Option<BackupError> = None;
        for attempt in 1..=self.retry.max_attempts {
            match self.try_backup(endpoint, &artifact_name).await {
                Ok(artifact) => {
                    tracing::info!(
                        device = %device_name,
                        artifact = %artifact.name,
                        size = artifact.size,
                        "Backup created"
                    );
                    return Ok(artifact);
                }
                Err(e) => {
                    tracing::warn!(
                        device = %device_name,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %e,
                        "Backup attempt failed"
                    );
                    last_err = Some(e);
                    if attempt < self.retry.max_attempts {
                        self.sleeper.sleep(self.retry.backoff).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or(BackupError::AttemptsExhausted(self.retry.max_attempts)))
    }

    async fn try_backup(
        &self,
        endpoint: &DeviceEndpoint,
        artifact_name: &str,
    ) -> Result<BackupArtifact, BackupError> {
        let client = self.connector.connect(endpoint).await?;
        client.create_backup(artifact_name).await?;

        let polls = probe_count(self.backup_opts.wait_timeout, self.backup_opts.poll_interval);
        for _ in 0..polls {
            let files = client.list_files().await?;
            if let Some(artifact) = find_artifact(&files, Some(artifact_name)) {
                return Ok(artifact);
            }
            self.sleeper.sleep(self.backup_opts.poll_interval).await;
        }

        // No artifact matched the name pattern; fall back to the most
        // recently created backup before giving up on this attempt.
        let files = client.list_files().await?;
        find_artifact(&files, None).ok_or(BackupError::CreationTimedOut)
    }

    /// Restores the named artifact and drives the reboot-and-reconnect
    /// sequence.
    pub async fn restore(
        &self,
        endpoint: &DeviceEndpoint,
        artifact_name: &str,
    ) -> Result<RestoreOutcome, BackupError> {
        let mut name = artifact_name.trim().to_string();
        if !valid_artifact_name(&name) {
            return Err(BackupError::InvalidArtifactName(name));
        }
        if !name.ends_with(".backup") {
            name.push_str(".backup");
        }

        let client = self.connect_with_retry(endpoint).await?;

        // Never blind-restore: the artifact must exist on the device.
        let files = client.list_files().await?;
        let exists = files.iter().any(|f| f.name.as_deref() == Some(&name));
        if !exists {
            return Err(BackupError::ArtifactNotFound(name));
        }

        let version_before = client
            .fetch_resource()
            .await
            .ok()
            .and_then(|r| r.version.clone());

        client.restore_backup(&name).await?;
        drop(client);
        tracing::info!(artifact = %name, "Restore issued, waiting for device reboot");

        let probe = DeviceEndpoint {
            timeout: self.restore_opts.probe_timeout,
            ..endpoint.clone()
        };

        // Phase 1: wait for the device to drop offline.
        let mut went_offline = false;
        let offline_probes = probe_count(
            self.restore_opts.offline_wait,
            self.restore_opts.probe_interval,
        );
        for _ in 0..offline_probes {
            match self.connector.connect(&probe).await {
                Err(_) => {
                    went_offline = true;
                    break;
                }
                Ok(_) => self.sleeper.sleep(self.restore_opts.probe_interval).await,
            }
        }
        if !went_offline {
            tracing::warn!("Device did not appear to go offline during restore");
        }

        // Phase 2: wait for the device to come back online.
        let online_probes = probe_count(
            self.restore_opts.online_wait,
            self.restore_opts.probe_interval,
        );
        for _ in 0..online_probes {
            self.sleeper.sleep(self.restore_opts.probe_interval).await;
            if let Ok(client) = self.connector.connect(&probe).await {
                return Ok(self
                    .success_outcome(&*client, went_offline, version_before)
                    .await);
            }
        }

        // Losing the device for the whole window is an expected side effect
        // of rebooting; one delayed re-check before the non-blocking
        // warning outcome.
        self.sleeper.sleep(self.retry.backoff).await;
        if let Ok(client) = self.connector.connect(&probe).await {
            return Ok(self
                .success_outcome(&*client, went_offline, version_before)
                .await);
        }

        Ok(RestoreOutcome {
            completed: false,
            warning: Some(
                "device did not reconnect within the wait window; restore may still be in progress"
                    .to_string(),
            ),
            version_before,
            version_after: None,
        })
    }

    async fn success_outcome(
        &self,
        client: &dyn DeviceClient,
        went_offline: bool,
        version_before: Option<String>,
    ) -> RestoreOutcome {
        let version_after = client
            .fetch_resource()
            .await
            .ok()
            .and_then(|r| r.version.clone());
        RestoreOutcome {
            completed: true,
            warning: if went_offline {
                None
            } else {
                Some("device never appeared to go offline during restore".to_string())
            },
            version_before,
            version_after,
        }
    }

    async fn connect_with_retry(
        &self,
        endpoint: &DeviceEndpoint,
    ) -> Result<Box<dyn DeviceClient>, BackupError> {
        let mut last_err: Option<DeviceError> = None;
        for attempt in 1..=self.retry.max_attempts {
            match self.connector.connect(endpoint).await {
                Ok(client) => return Ok(client),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Connection attempt failed");
                    last_err = Some(e);
                    if attempt < self.retry.max_attempts {
                        self.sleeper.sleep(self.retry.backoff).await;
                    }
                }
            }
        }
        match last_err {
            Some(e) => Err(BackupError::Device(e)),
            None => Err(BackupError::AttemptsExhausted(self.retry.max_attempts)),
        }
    }
}

/// Locates a `.backup` artifact: by name pattern when `matching` is given,
/// otherwise the most recently created one.
fn find_artifact(files: &[crate::RawFile], matching: Option<&str>) -> Option<BackupArtifact> {
    let mut backups: Vec<&crate::RawFile> = files
        .iter()
        .filter(|f| {
            f.name
                .as_deref()
                .map(|n| n.ends_with(".backup"))
                .unwrap_or(false)
        })
        .collect();

    if let Some(pattern) = matching {
        backups.retain(|f| {
            f.name
                .as_deref()
                .map(|n| n.contains(pattern))
                .unwrap_or(false)
        });
    } else {
        // RouterOS creation-time strings sort chronologically per device
        backups.sort_by(|a, b| b.creation_time.cmp(&a.creation_time));
    }

    backups.first().map(|f| BackupArtifact {
        name: f.name.clone().unwrap_or_default(),
        size: f
            .size
            .as_deref()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0),
        created: f.creation_time.clone().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as DeviceResult;
    use crate::{
        RawDhcpLease, RawFile, RawHealth, RawIdentity, RawInterface, RawRegistration, RawResource,
    };
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct InstantSleeper;

    #[async_trait]
    impl Sleeper for InstantSleeper {
        async fn sleep(&self, _duration: Duration) {}
    }

    #[derive(Default)]
    struct ScriptState {
        /// Scripted connect outcomes; when exhausted, `default_online`
        /// applies.
        connect_plan: VecDeque<bool>,
        default_online: bool,
        connect_count: u32,
        files: Vec<RawFile>,
        backup_appends_file: bool,
        version: Option<String>,
    }

    struct ScriptedConnector {
        state: Arc<Mutex<ScriptState>>,
    }

    struct ScriptedClient {
        state: Arc<Mutex<ScriptState>>,
    }

    #[async_trait]
    impl DeviceConnector for ScriptedConnector {
        async fn connect(&self, _endpoint: &DeviceEndpoint) -> DeviceResult<Box<dyn DeviceClient>> {
            let mut state = self.state.lock().unwrap();
            state.connect_count += 1;
            let online = state
                .connect_plan
                .pop_front()
                .unwrap_or(state.default_online);
            if online {
                Ok(Box::new(ScriptedClient {
                    state: self.state.clone(),
                }))
            } else {
                Err(DeviceError::ConnectionFailed("refused".to_string()))
            }
        }
    }

    #[async_trait]
    impl DeviceClient for ScriptedClient {
        async fn fetch_resource(&self) -> DeviceResult<RawResource> {
            let state = self.state.lock().unwrap();
            Ok(RawResource {
                version: state.version.clone(),
                ..Default::default()
            })
        }

        async fn fetch_identity(&self) -> DeviceResult<RawIdentity> {
            Ok(RawIdentity::default())
        }

        async fn fetch_health(&self) -> DeviceResult<Option<RawHealth>> {
            Ok(None)
        }

        async fn fetch_interfaces(
            &self,
            _filter_name: Option<&str>,
        ) -> DeviceResult<Vec<RawInterface>> {
            Ok(Vec::new())
        }

        async fn fetch_wireless_clients(&self) -> DeviceResult<Vec<RawRegistration>> {
            Ok(Vec::new())
        }

        async fn fetch_dhcp_leases(&self) -> DeviceResult<Vec<RawDhcpLease>> {
            Ok(Vec::new())
        }

        async fn fetch_capsman_clients(&self) -> DeviceResult<Vec<RawRegistration>> {
            Ok(Vec::new())
        }

        async fn list_files(&self) -> DeviceResult<Vec<RawFile>> {
            Ok(self.state.lock().unwrap().files.clone())
        }

        async fn run_query(&self, _path: &str) -> DeviceResult<serde_json::Value> {
            Ok(serde_json::Value::Array(Vec::new()))
        }

        async fn create_backup(&self, name: &str) -> DeviceResult<()> {
            let mut state = self.state.lock().unwrap();
            if state.backup_appends_file {
                state.files.push(RawFile {
                    name: Some(format!("{name}.backup")),
                    size: Some("1024".to_string()),
                    creation_time: Some("2025-08-06 10:00:00".to_string()),
                });
            }
            Ok(())
        }

        async fn restore_backup(&self, _name: &str) -> DeviceResult<()> {
            Ok(())
        }
    }

    fn orchestrator(state: Arc<Mutex<ScriptState>>) -> BackupOrchestrator {
        BackupOrchestrator::new(
            Arc::new(ScriptedConnector { state }),
            RetryPolicy::default(),
            BackupOptions::default(),
            RestoreOptions::default(),
            Arc::new(InstantSleeper),
        )
    }

    fn endpoint() -> DeviceEndpoint {
        DeviceEndpoint {
            address: "192.0.2.1".to_string(),
            username: "admin".to_string(),
            secret: "secret".to_string(),
            port: 443,
            use_tls: true,
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn sanitize_strips_unsafe_characters() {
        assert_eq!(sanitize_artifact_name("core router #1"), "core_router__1");
        assert_eq!(sanitize_artifact_name("gw-01_main"), "gw-01_main");
    }

    #[tokio::test]
    async fn backup_locates_matching_artifact() {
        let state = Arc::new(Mutex::new(ScriptState {
            default_online: true,
            backup_appends_file: true,
            ..Default::default()
        }));
        let orch = orchestrator(state.clone());

        let artifact = orch.backup(&endpoint(), "gw-01").await.unwrap();
        assert!(artifact.name.starts_with("gw-01_"));
        assert!(artifact.name.ends_with(".backup"));
        assert_eq!(artifact.size, 1024);
    }

    #[tokio::test]
    async fn backup_falls_back_to_latest_artifact() {
        let state = Arc::new(Mutex::new(ScriptState {
            default_online: true,
            backup_appends_file: false,
            files: vec![
                RawFile {
                    name: Some("old.backup".to_string()),
                    size: Some("10".to_string()),
                    creation_time: Some("2025-01-01 00:00:00".to_string()),
                },
                RawFile {
                    name: Some("recent.backup".to_string()),
                    size: Some("20".to_string()),
                    creation_time: Some("2025-06-01 00:00:00".to_string()),
                },
                RawFile {
                    name: Some("notes.txt".to_string()),
                    size: Some("1".to_string()),
                    creation_time: Some("2025-07-01 00:00:00".to_string()),
                },
            ],
            ..Default::default()
        }));
        let orch = orchestrator(state);

        let artifact = orch.backup(&endpoint(), "gw-01").await.unwrap();
        assert_eq!(artifact.name, "recent.backup");
    }

    #[tokio::test]
    async fn backup_fails_after_bounded_retries_without_artifact() {
        let state = Arc::new(Mutex::new(ScriptState {
            default_online: true,
            backup_appends_file: false,
            ..Default::default()
        }));
        let orch = orchestrator(state.clone());

        let err = orch.backup(&endpoint(), "gw-01").await.unwrap_err();
        assert!(matches!(err, BackupError::CreationTimedOut));
        // One connect per attempt, never an unbounded loop
        assert_eq!(state.lock().unwrap().connect_count, 2);
    }

    #[tokio::test]
    async fn backup_retries_connection_failures() {
        let state = Arc::new(Mutex::new(ScriptState {
            connect_plan: VecDeque::from([false]),
            default_online: true,
            backup_appends_file: true,
            ..Default::default()
        }));
        let orch = orchestrator(state);

        let artifact = orch.backup(&endpoint(), "gw-01").await.unwrap();
        assert!(artifact.name.ends_with(".backup"));
    }

    #[tokio::test]
    async fn restore_refuses_missing_artifact() {
        let state = Arc::new(Mutex::new(ScriptState {
            default_online: true,
            ..Default::default()
        }));
        let orch = orchestrator(state);

        let err = orch.restore(&endpoint(), "ghost").await.unwrap_err();
        assert!(matches!(err, BackupError::ArtifactNotFound(_)));
    }

    #[tokio::test]
    async fn restore_rejects_unsafe_artifact_name() {
        let state = Arc::new(Mutex::new(ScriptState::default()));
        let orch = orchestrator(state.clone());

        let err = orch.restore(&endpoint(), "../etc/passwd").await.unwrap_err();
        assert!(matches!(err, BackupError::InvalidArtifactName(_)));
        // Rejected before any connection attempt
        assert_eq!(state.lock().unwrap().connect_count, 0);
    }

    #[tokio::test]
    async fn restore_completes_after_reboot_cycle() {
        // Initial connect, two offline probes, then back online
        let state = Arc::new(Mutex::new(ScriptState {
            connect_plan: VecDeque::from([true, false, false, true]),
            default_online: true,
            files: vec![RawFile {
                name: Some("gw-01_20250806.backup".to_string()),
                size: Some("1024".to_string()),
                creation_time: Some("2025-08-06 10:00:00".to_string()),
            }],
            version: Some("7.14.2".to_string()),
            ..Default::default()
        }));
        let orch = orchestrator(state);

        let outcome = orch
            .restore(&endpoint(), "gw-01_20250806.backup")
            .await
            .unwrap();
        assert!(outcome.completed);
        assert!(outcome.warning.is_none());
        assert_eq!(outcome.version_before.as_deref(), Some("7.14.2"));
        assert_eq!(outcome.version_after.as_deref(), Some("7.14.2"));
    }

    #[tokio::test]
    async fn restore_reports_warning_when_device_never_returns() {
        let state = Arc::new(Mutex::new(ScriptState {
            connect_plan: VecDeque::from([true]),
            default_online: false,
            files: vec![RawFile {
                name: Some("gw-01.backup".to_string()),
                size: Some("1024".to_string()),
                creation_time: Some("2025-08-06 10:00:00".to_string()),
            }],
            ..Default::default()
        }));
        let orch = orchestrator(state.clone());

        let outcome = orch.restore(&endpoint(), "gw-01.backup").await.unwrap();
        assert!(!outcome.completed);
        assert!(outcome.warning.is_some());
        // Probes are bounded: 1 initial + 1 offline + 60 online + 1 delayed
        let connects = state.lock().unwrap().connect_count;
        assert!(connects <= 63, "unbounded probing: {connects} connects");
    }
}
