use crate::secret::SecretCipher;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rosmon_common::types::is_produced_metric;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const DEVICES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS devices (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    address TEXT NOT NULL,
    username TEXT NOT NULL,
    secret_enc TEXT NOT NULL,
    api_port INTEGER NOT NULL DEFAULT 443,
    use_tls INTEGER NOT NULL DEFAULT 1,
    model TEXT,
    location TEXT,
    notes TEXT,
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_devices_enabled ON devices(enabled);
";

const ALERT_RULES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS alert_rules (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    device_pattern TEXT NOT NULL,
    metric_type TEXT NOT NULL,
    metric_name TEXT NOT NULL,
    operator TEXT NOT NULL,
    threshold REAL NOT NULL,
    duration_secs INTEGER NOT NULL DEFAULT 0,
    severity TEXT NOT NULL DEFAULT 'warning',
    enabled INTEGER NOT NULL DEFAULT 1,
    notify_email INTEGER NOT NULL DEFAULT 0,
    notify_telegram INTEGER NOT NULL DEFAULT 0,
    email_recipients TEXT NOT NULL DEFAULT '',
    message_template TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alert_rules_enabled ON alert_rules(enabled);
";

/// Comparison operators accepted in alert rules. Closed set.
pub const ALLOWED_OPERATORS: &[&str] = &[">", "<", ">=", "<=", "=="];

/// A registered device. The credential is not part of the row; it is
/// fetched and decrypted separately via [`DeviceRegistry::device_secret`]
/// so it can never leak through serialization or logging.
#[derive(Debug, Clone)]
pub struct DeviceRow {
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

#[derive(Debug, Clone)]
pub struct NewDevice {
    pub name: String,
    pub address: String,
    pub username: String,
    pub secret: String,
    pub api_port: u16,
    pub use_tls: bool,
    pub model: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub enabled: bool,
}

/// Partial device update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct UpdateDevice {
    pub name: Option<String>,
    pub address: Option<String>,
    pub username: Option<String>,
    pub secret: Option<String>,
    pub api_port: Option<u16>,
    pub use_tls: Option<bool>,
    pub model: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub enabled: Option<bool>,
}

impl UpdateDevice {
    /// True when the update touches a field that changes the reachable
    /// endpoint, requiring a fresh connection test.
    pub fn connection_relevant(&self) -> bool {
        self.address.is_some()
            || self.username.is_some()
            || self.secret.is_some()
            || self.api_port.is_some()
            || self.use_tls.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct AlertRuleRow {
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

#[derive(Debug, Clone)]
pub struct NewAlertRule {
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
}

/// Partial rule update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct UpdateAlertRule {
    pub name: Option<String>,
    pub device_pattern: Option<String>,
    pub metric_type: Option<String>,
    pub metric_name: Option<String>,
    pub operator: Option<String>,
    pub threshold: Option<f64>,
    pub duration_secs: Option<u64>,
    pub severity: Option<String>,
    pub enabled: Option<bool>,
    pub notify_email: Option<bool>,
    pub notify_telegram: Option<bool>,
    pub email_recipients: Option<String>,
    pub message_template: Option<String>,
}

/// Registry of devices and alert rules, backed by a single SQLite
/// database next to the metric partitions.
pub struct DeviceRegistry {
    conn: Mutex<Connection>,
    cipher: SecretCipher,
}

impl DeviceRegistry {
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("registry.db");
        let conn = Connection::open(&db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(DEVICES_SCHEMA)?;
        conn.execute_batch(ALERT_RULES_SCHEMA)?;

        let cipher = SecretCipher::load_or_create(data_dir)?;
        tracing::info!(path = %db_path.display(), "Initialized device registry");
        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ---- Devices ----

    pub fn insert_device(&self, new: &NewDevice) -> Result<DeviceRow> {
        validate_device(new)?;

        let id = rosmon_common::id::next_id();
        let now = Utc::now();
        let secret_enc = self.cipher.encrypt(&new.secret)?;

        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO devices
             (id, name, address, username, secret_enc, api_port, use_tls, model, location, notes,
              enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            rusqlite::params![
                &id,
                &new.name,
                &new.address,
                &new.username,
                &secret_enc,
                new.api_port as i64,
                new.use_tls as i64,
                new.model.as_deref(),
                new.location.as_deref(),
                new.notes.as_deref(),
                new.enabled as i64,
                now.timestamp_millis(),
                now.timestamp_millis(),
            ],
        )?;
        drop(conn);

        self.get_device(&id)?
            .ok_or_else(|| anyhow::anyhow!("Device {id} vanished after insert"))
    }

    pub fn list_devices(&self, enabled_only: bool) -> Result<Vec<DeviceRow>> {
        let conn = self.lock_conn();
        let sql = if enabled_only {
            "SELECT id, name, address, username, api_port, use_tls, model, location, notes,
                    enabled, created_at, updated_at
             FROM devices WHERE enabled = 1 ORDER BY name"
        } else {
            "SELECT id, name, address, username, api_port, use_tls, model, location, notes,
                    enabled, created_at, updated_at
             FROM devices ORDER BY name"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], map_device)?;
        let mut devices = Vec::new();
        for row in rows {
            devices.push(row?);
        }
        Ok(devices)
    }

    pub fn get_device(&self, id: &str) -> Result<Option<DeviceRow>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, address, username, api_port, use_tls, model, location, notes,
                    enabled, created_at, updated_at
             FROM devices WHERE id = ?1",
        )?;
        Ok(stmt.query_row([id], map_device).optional()?)
    }

    /// Decrypts the stored credential for one connection attempt.
    pub fn device_secret(&self, id: &str) -> Result<Option<String>> {
        let conn = self.lock_conn();
        let encrypted: Option<String> = conn
            .query_row(
                "SELECT secret_enc FROM devices WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        drop(conn);
        match encrypted {
            Some(enc) => Ok(Some(self.cipher.decrypt(&enc)?)),
            None => Ok(None),
        }
    }

    pub fn update_device(&self, id: &str, update: &UpdateDevice) -> Result<Option<DeviceRow>> {
        let Some(existing) = self.get_device(id)? else {
            return Ok(None);
        };

        if let Some(port) = update.api_port {
            if port == 0 {
                anyhow::bail!("api_port must be between 1 and 65535");
            }
        }

        let secret_enc = match &update.secret {
            Some(secret) if secret.is_empty() => anyhow::bail!("secret must not be empty"),
            Some(secret) => Some(self.cipher.encrypt(secret)?),
            None => None,
        };

        let now = Utc::now();
        let conn = self.lock_conn();
        conn.execute(
            "UPDATE devices SET
                name = COALESCE(?1, name),
                address = COALESCE(?2, address),
                username = COALESCE(?3, username),
                secret_enc = COALESCE(?4, secret_enc),
                api_port = COALESCE(?5, api_port),
                use_tls = COALESCE(?6, use_tls),
                model = COALESCE(?7, model),
                location = COALESCE(?8, location),
                notes = COALESCE(?9, notes),
                enabled = COALESCE(?10, enabled),
                updated_at = ?11
             WHERE id = ?12",
            rusqlite::params![
                update.name.as_deref(),
                update.address.as_deref(),
                update.username.as_deref(),
                secret_enc.as_deref(),
                update.api_port.map(|p| p as i64),
                update.use_tls.map(|t| t as i64),
                update.model.as_deref(),
                update.location.as_deref(),
                update.notes.as_deref(),
                update.enabled.map(|e| e as i64),
                now.timestamp_millis(),
                &existing.id,
            ],
        )?;
        drop(conn);

        self.get_device(id)
    }

    /// Deletes a device and every alert rule targeting exactly that
    /// device id.
    pub fn delete_device(&self, id: &str) -> Result<bool> {
        let conn = self.lock_conn();
        conn.execute("DELETE FROM alert_rules WHERE device_pattern = ?1", [id])?;
        let deleted = conn.execute("DELETE FROM devices WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    // ---- Alert rules ----

    pub fn insert_alert_rule(&self, new: &NewAlertRule) -> Result<AlertRuleRow> {
        validate_rule(
            &new.name,
            &new.metric_type,
            &new.metric_name,
            &new.operator,
            new.threshold,
            &new.severity,
        )?;

        let id = rosmon_common::id::next_id();
        let now = Utc::now();

        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO alert_rules
             (id, name, device_pattern, metric_type, metric_name, operator, threshold,
              duration_secs, severity, enabled, notify_email, notify_telegram,
              email_recipients, message_template, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            rusqlite::params![
                &id,
                &new.name,
                &new.device_pattern,
                &new.metric_type,
                &new.metric_name,
                &new.operator,
                new.threshold,
                new.duration_secs as i64,
                &new.severity,
                new.enabled as i64,
                new.notify_email as i64,
                new.notify_telegram as i64,
                &new.email_recipients,
                &new.message_template,
                now.timestamp_millis(),
                now.timestamp_millis(),
            ],
        )?;
        drop(conn);

        self.get_alert_rule(&id)?
            .ok_or_else(|| anyhow::anyhow!("Alert rule {id} vanished after insert"))
    }

    pub fn list_alert_rules(&self, enabled_only: bool) -> Result<Vec<AlertRuleRow>> {
        let conn = self.lock_conn();
        let sql = if enabled_only {
            "SELECT id, name, device_pattern, metric_type, metric_name, operator, threshold,
                    duration_secs, severity, enabled, notify_email, notify_telegram,
                    email_recipients, message_template, created_at, updated_at
             FROM alert_rules WHERE enabled = 1 ORDER BY created_at"
        } else {
            "SELECT id, name, device_pattern, metric_type, metric_name, operator, threshold,
                    duration_secs, severity, enabled, notify_email, notify_telegram,
                    email_recipients, message_template, created_at, updated_at
             FROM alert_rules ORDER BY created_at"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], map_rule)?;
        let mut rules = Vec::new();
        for row in rows {
            rules.push(row?);
        }
        Ok(rules)
    }

    pub fn get_alert_rule(&self, id: &str) -> Result<Option<AlertRuleRow>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, device_pattern, metric_type, metric_name, operator, threshold,
                    duration_secs, severity, enabled, notify_email, notify_telegram,
                    email_recipients, message_template, created_at, updated_at
             FROM alert_rules WHERE id = ?1",
        )?;
        Ok(stmt.query_row([id], map_rule).optional()?)
    }

    pub fn update_alert_rule(
        &self,
        id: &str,
        update: &UpdateAlertRule,
    ) -> Result<Option<AlertRuleRow>> {
        let Some(existing) = self.get_alert_rule(id)? else {
            return Ok(None);
        };

        // Re-validate the effective rule after the partial update
        validate_rule(
            update.name.as_deref().unwrap_or(&existing.name),
            update.metric_type.as_deref().unwrap_or(&existing.metric_type),
            update.metric_name.as_deref().unwrap_or(&existing.metric_name),
            update.operator.as_deref().unwrap_or(&existing.operator),
            update.threshold.unwrap_or(existing.threshold),
            update.severity.as_deref().unwrap_or(&existing.severity),
        )?;

        let now = Utc::now();
        let conn = self.lock_conn();
        conn.execute(
            "UPDATE alert_rules SET
                name = COALESCE(?1, name),
                device_pattern = COALESCE(?2, device_pattern),
                metric_type = COALESCE(?3, metric_type),
                metric_name = COALESCE(?4, metric_name),
                operator = COALESCE(?5, operator),
                threshold = COALESCE(?6, threshold),
                duration_secs = COALESCE(?7, duration_secs),
                severity = COALESCE(?8, severity),
                enabled = COALESCE(?9, enabled),
                notify_email = COALESCE(?10, notify_email),
                notify_telegram = COALESCE(?11, notify_telegram),
                email_recipients = COALESCE(?12, email_recipients),
                message_template = COALESCE(?13, message_template),
                updated_at = ?14
             WHERE id = ?15",
            rusqlite::params![
                update.name.as_deref(),
                update.device_pattern.as_deref(),
                update.metric_type.as_deref(),
                update.metric_name.as_deref(),
                update.operator.as_deref(),
                update.threshold,
                update.duration_secs.map(|d| d as i64),
                update.severity.as_deref(),
                update.enabled.map(|e| e as i64),
                update.notify_email.map(|n| n as i64),
                update.notify_telegram.map(|n| n as i64),
                update.email_recipients.as_deref(),
                update.message_template.as_deref(),
                now.timestamp_millis(),
                &existing.id,
            ],
        )?;
        drop(conn);

        self.get_alert_rule(id)
    }

    pub fn delete_alert_rule(&self, id: &str) -> Result<bool> {
        let conn = self.lock_conn();
        let deleted = conn.execute("DELETE FROM alert_rules WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }
}

fn validate_device(new: &NewDevice) -> Result<()> {
    if new.name.trim().is_empty() {
        anyhow::bail!("device name must not be empty");
    }
    if new.address.trim().is_empty() {
        anyhow::bail!("device address must not be empty");
    }
    if new.username.trim().is_empty() {
        anyhow::bail!("device username must not be empty");
    }
    if new.secret.is_empty() {
        anyhow::bail!("secret must not be empty");
    }
    if new.api_port == 0 {
        anyhow::bail!("api_port must be between 1 and 65535");
    }
    Ok(())
}

fn validate_rule(
    name: &str,
    metric_type: &str,
    metric_name: &str,
    operator: &str,
    threshold: f64,
    severity: &str,
) -> Result<()> {
    if name.trim().is_empty() {
        anyhow::bail!("rule name must not be empty");
    }
    if !ALLOWED_OPERATORS.contains(&operator) {
        anyhow::bail!("unknown compare operator: {operator}");
    }
    if !is_produced_metric(metric_type, metric_name) {
        anyhow::bail!("metric selector {metric_type}/{metric_name} is not produced by the poller");
    }
    if !threshold.is_finite() {
        anyhow::bail!("threshold must be a finite number");
    }
    severity
        .parse::<rosmon_common::types::Severity>()
        .map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}

fn map_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeviceRow> {
    Ok(DeviceRow {
        id: row.get(0)?,
        name: row.get(1)?,
        address: row.get(2)?,
        username: row.get(3)?,
        api_port: row.get::<_, i64>(4)? as u16,
        use_tls: row.get::<_, i64>(5)? != 0,
        model: row.get(6)?,
        location: row.get(7)?,
        notes: row.get(8)?,
        enabled: row.get::<_, i64>(9)? != 0,
        created_at: DateTime::from_timestamp_millis(row.get::<_, i64>(10)?).unwrap_or_default(),
        updated_at: DateTime::from_timestamp_millis(row.get::<_, i64>(11)?).unwrap_or_default(),
    })
}

fn map_rule(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlertRuleRow> {
    Ok(AlertRuleRow {
        id: row.get(0)?,
        name: row.get(1)?,
        device_pattern: row.get(2)?,
        metric_type: row.get(3)?,
        metric_name: row.get(4)?,
        operator: row.get(5)?,
        threshold: row.get(6)?,
        duration_secs: row.get::<_, i64>(7)?.max(0) as u64,
        severity: row.get(8)?,
        enabled: row.get::<_, i64>(9)? != 0,
        notify_email: row.get::<_, i64>(10)? != 0,
        notify_telegram: row.get::<_, i64>(11)? != 0,
        email_recipients: row.get(12)?,
        message_template: row.get(13)?,
        created_at: DateTime::from_timestamp_millis(row.get::<_, i64>(14)?).unwrap_or_default(),
        updated_at: DateTime::from_timestamp_millis(row.get::<_, i64>(15)?).unwrap_or_default(),
    })
}
