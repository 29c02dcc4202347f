use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub alerts: AlertCheckConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            data_dir: default_data_dir(),
            retention_days: default_retention_days(),
            poll: PollConfig::default(),
            alerts: AlertCheckConfig::default(),
            backup: BackupConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Metrics poll loop interval in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
    /// Worker pool bound: devices polled concurrently per round.
    #[serde(default = "default_poll_max_concurrent")]
    pub max_concurrent: usize,
    /// Per-device connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Overall per-device poll timeout in seconds; an overrunning poll is
    /// abandoned and recorded as offline.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval_secs(),
            max_concurrent: default_poll_max_concurrent(),
            connect_timeout_secs: default_connect_timeout_secs(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertCheckConfig {
    #[serde(default = "default_alerts_enabled")]
    pub enabled: bool,
    /// Alert-check loop interval in seconds, independent of the poll loop.
    #[serde(default = "default_alert_interval_secs")]
    pub interval_secs: u64,
}

impl Default for AlertCheckConfig {
    fn default() -> Self {
        Self {
            enabled: default_alerts_enabled(),
            interval_secs: default_alert_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_backup_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backup_backoff_secs")]
    pub backoff_secs: u64,
    /// Bounded wait for the backup artifact to appear, in seconds.
    #[serde(default = "default_backup_wait_secs")]
    pub wait_timeout_secs: u64,
    #[serde(default = "default_backup_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Restore: bounded wait for the device to drop offline.
    #[serde(default = "default_restore_offline_wait_secs")]
    pub restore_offline_wait_secs: u64,
    /// Restore: bounded wait for the device to come back online.
    #[serde(default = "default_restore_online_wait_secs")]
    pub restore_online_wait_secs: u64,
    #[serde(default = "default_restore_probe_interval_secs")]
    pub probe_interval_secs: u64,
    #[serde(default = "default_restore_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_backup_max_attempts(),
            backoff_secs: default_backup_backoff_secs(),
            wait_timeout_secs: default_backup_wait_secs(),
            poll_interval_ms: default_backup_poll_interval_ms(),
            restore_offline_wait_secs: default_restore_offline_wait_secs(),
            restore_online_wait_secs: default_restore_online_wait_secs(),
            probe_interval_secs: default_restore_probe_interval_secs(),
            probe_timeout_secs: default_restore_probe_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotifyConfig {
    #[serde(default)]
    pub email: Option<EmailConfig>,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_username: Option<String>,
    #[serde(default)]
    pub smtp_password: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

fn default_http_port() -> u16 {
    8080
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_retention_days() -> u32 {
    7
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_poll_max_concurrent() -> usize {
    10
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_alerts_enabled() -> bool {
    true
}

fn default_alert_interval_secs() -> u64 {
    30
}

fn default_backup_max_attempts() -> u32 {
    2
}

fn default_backup_backoff_secs() -> u64 {
    1
}

fn default_backup_wait_secs() -> u64 {
    10
}

fn default_backup_poll_interval_ms() -> u64 {
    500
}

fn default_restore_offline_wait_secs() -> u64 {
    30
}

fn default_restore_online_wait_secs() -> u64 {
    120
}

fn default_restore_probe_interval_secs() -> u64 {
    2
}

fn default_restore_probe_timeout_secs() -> u64 {
    3
}

fn default_smtp_port() -> u16 {
    587
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads the config file, falling back to defaults when it does not
    /// exist. A malformed file is still an error.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if std::path::Path::new(path).exists() {
            Self::load(path)
        } else {
            tracing::info!(path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.poll.interval_secs, 60);
        assert_eq!(config.alerts.interval_secs, 30);
        assert_eq!(config.backup.max_attempts, 2);
        assert!(config.notify.email.is_none());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            http_port = 9000

            [poll]
            interval_secs = 15

            [notify.telegram]
            bot_token = "token"
            chat_id = "42"
            "#,
        )
        .unwrap();
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.poll.interval_secs, 15);
        assert_eq!(config.poll.max_concurrent, 10);
        assert!(config.notify.telegram.is_some());
        assert!(config.notify.email.is_none());
    }
}
