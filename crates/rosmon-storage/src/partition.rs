use crate::PartitionInfo;
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing;

const METRICS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS metrics (
    id TEXT PRIMARY KEY,
    device_id TEXT NOT NULL,
    metric_type TEXT NOT NULL,
    metric_name TEXT NOT NULL,
    value REAL NOT NULL,
    timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_metrics_device_metric_time
    ON metrics(device_id, metric_type, metric_name, timestamp);
CREATE INDEX IF NOT EXISTS idx_metrics_time
    ON metrics(timestamp);
";

const ALERTS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS alert_events (
    id TEXT PRIMARY KEY,
    rule_id TEXT NOT NULL,
    rule_name TEXT NOT NULL,
    device_id TEXT NOT NULL,
    metric_type TEXT NOT NULL,
    metric_name TEXT NOT NULL,
    severity TEXT NOT NULL,
    operator TEXT NOT NULL,
    message TEXT NOT NULL,
    value REAL NOT NULL,
    threshold REAL NOT NULL,
    fired_at INTEGER NOT NULL,
    acknowledged INTEGER NOT NULL DEFAULT 0,
    acknowledged_by TEXT,
    acknowledged_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_alerts_time ON alert_events(fired_at);
CREATE INDEX IF NOT EXISTS idx_alerts_device ON alert_events(device_id);
";

pub struct PartitionManager {
    data_dir: PathBuf,
    connections: Mutex<HashMap<String, Connection>>,
}

impl PartitionManager {
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            connections: Mutex::new(HashMap::new()),
        })
    }

    /// Lock the connections map, recovering from a poisoned Mutex if necessary.
    fn lock_connections(&self) -> MutexGuard<'_, HashMap<String, Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn partition_key(ts: DateTime<Utc>) -> String {
        ts.format("%Y-%m-%d").to_string()
    }

    fn partition_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.db"))
    }

    pub fn get_or_create(&self, ts: DateTime<Utc>) -> Result<String> {
        let key = Self::partition_key(ts);
        let mut conns = self.lock_connections();
        if !conns.contains_key(&key) {
            let path = self.partition_path(&key);
            let conn = Connection::open(&path)?;
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
            conn.execute_batch(METRICS_SCHEMA)?;
            conn.execute_batch(ALERTS_SCHEMA)?;
            tracing::info!(partition = %key, "Created new partition");
            conns.insert(key.clone(), conn);
        }
        Ok(key)
    }

    pub fn with_partition<F, R>(&self, key: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conns = self.lock_connections();
        let conn = conns
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("Partition {key} not found"))?;
        f(conn)
    }

    /// Partition keys overlapping the range, oldest first. Partitions not
    /// yet in the connection cache are opened on the way.
    pub fn partitions_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let from_date = from.date_naive();
        let to_date = to.date_naive();
        let mut keys = Vec::new();
        let mut date = from_date;
        while date <= to_date {
            let key = date.format("%Y-%m-%d").to_string();
            let path = self.partition_path(&key);
            if path.exists() {
                let mut conns = self.lock_connections();
                if !conns.contains_key(&key) {
                    let conn = Connection::open(&path)?;
                    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
                    conns.insert(key.clone(), conn);
                }
                keys.push(key);
            }
            date = date.succ_opt().unwrap_or(date);
        }
        Ok(keys)
    }

    pub fn cleanup_older_than(&self, retention_days: u32) -> Result<u32> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
        let cutoff_date = cutoff.date_naive();
        let mut removed = 0u32;

        let mut expired: Vec<(String, PathBuf)> = Vec::new();
        let entries = std::fs::read_dir(&self.data_dir)?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(date_str) = name.strip_suffix(".db") {
                if let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
                    if date < cutoff_date {
                        expired.push((date_str.to_string(), entry.path()));
                    }
                }
            }
        }

        // Best-effort deletion: log errors, don't abort the sweep
        for (date_str, db_path) in &expired {
            // Drop the cached Connection first so WAL checkpoints
            {
                let mut conns = self.lock_connections();
                conns.remove(date_str.as_str());
            }

            if let Err(e) = std::fs::remove_file(db_path) {
                tracing::error!(partition = %date_str, error = %e, "Failed to remove partition file");
                continue;
            }
            let wal_path = self.data_dir.join(format!("{date_str}.db-wal"));
            let shm_path = self.data_dir.join(format!("{date_str}.db-shm"));
            if wal_path.exists() {
                if let Err(e) = std::fs::remove_file(&wal_path) {
                    tracing::warn!(path = %wal_path.display(), error = %e, "Failed to remove WAL file");
                }
            }
            if shm_path.exists() {
                if let Err(e) = std::fs::remove_file(&shm_path) {
                    tracing::warn!(path = %shm_path.display(), error = %e, "Failed to remove SHM file");
                }
            }

            tracing::info!(partition = %date_str, "Removed expired partition");
            removed += 1;
        }

        Ok(removed)
    }

    /// Returns information about all existing partitions on disk.
    pub fn list_partition_info(&self) -> Result<Vec<PartitionInfo>> {
        let mut infos = Vec::new();
        let entries = std::fs::read_dir(&self.data_dir)?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(date_str) = name.strip_suffix(".db") {
                if NaiveDate::parse_from_str(date_str, "%Y-%m-%d").is_ok() {
                    let metadata = entry.metadata()?;
                    infos.push(PartitionInfo {
                        date: date_str.to_string(),
                        size_bytes: metadata.len(),
                        path: entry.path().to_string_lossy().to_string(),
                    });
                }
            }
        }
        infos.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(infos)
    }

    /// Sets the acknowledgement fields of an alert event wherever it
    /// lives, loading unopened partitions from disk if needed. Only an
    /// unacknowledged event is updated; returns true when a row changed.
    pub fn acknowledge_alert(&self, event_id: &str, actor: &str) -> Result<bool> {
        let now = Utc::now().timestamp_millis();

        {
            let conns = self.lock_connections();
            for conn in conns.values() {
                let updated = conn.execute(
                    "UPDATE alert_events
                     SET acknowledged = 1, acknowledged_by = ?1, acknowledged_at = ?2
                     WHERE id = ?3 AND acknowledged = 0",
                    rusqlite::params![actor, now, event_id],
                )?;
                if updated > 0 {
                    return Ok(true);
                }
            }
        }

        // Scan disk for partitions not yet loaded
        let entries = std::fs::read_dir(&self.data_dir)?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(date_str) = name.strip_suffix(".db") {
                if NaiveDate::parse_from_str(date_str, "%Y-%m-%d").is_ok() {
                    let mut conns = self.lock_connections();
                    if !conns.contains_key(date_str) {
                        let conn = Connection::open(entry.path())?;
                        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
                        conns.insert(date_str.to_string(), conn);
                    }
                    let conn = conns
                        .get(date_str)
                        .ok_or_else(|| anyhow::anyhow!("Partition {date_str} vanished"))?;
                    let updated = conn.execute(
                        "UPDATE alert_events
                         SET acknowledged = 1, acknowledged_by = ?1, acknowledged_at = ?2
                         WHERE id = ?3 AND acknowledged = 0",
                        rusqlite::params![actor, now, event_id],
                    )?;
                    if updated > 0 {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_cleanup_removes_expired_partitions_and_wal_files() {
        let tmp = TempDir::new().unwrap();
        let pm = PartitionManager::new(tmp.path()).unwrap();

        let old_ts = Utc::now() - Duration::days(10);
        let old_key = pm.get_or_create(old_ts).unwrap();
        let old_db = tmp.path().join(format!("{old_key}.db"));

        let today_key = pm.get_or_create(Utc::now()).unwrap();
        let today_db = tmp.path().join(format!("{today_key}.db"));

        assert!(old_db.exists(), "old partition should exist");
        assert!(today_db.exists(), "today partition should exist");

        // SQLite WAL mode creates these alongside the database
        let old_wal = tmp.path().join(format!("{old_key}.db-wal"));
        let old_shm = tmp.path().join(format!("{old_key}.db-shm"));
        std::fs::write(&old_wal, b"wal data").unwrap();
        std::fs::write(&old_shm, b"shm data").unwrap();

        let removed = pm.cleanup_older_than(7).unwrap();

        assert_eq!(removed, 1);
        assert!(!old_db.exists(), "old .db should be deleted");
        assert!(!old_wal.exists(), "old .db-wal should be deleted");
        assert!(!old_shm.exists(), "old .db-shm should be deleted");
        assert!(today_db.exists(), "today partition should still exist");
    }

    #[test]
    fn test_cleanup_keeps_recent_partitions() {
        let tmp = TempDir::new().unwrap();
        let pm = PartitionManager::new(tmp.path()).unwrap();

        for i in 0..3 {
            let ts = Utc::now() - Duration::days(i);
            pm.get_or_create(ts).unwrap();
        }

        let removed = pm.cleanup_older_than(7).unwrap();
        assert_eq!(removed, 0);
    }
}
