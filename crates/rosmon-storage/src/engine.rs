use crate::partition::PartitionManager;
use crate::{clamp_limit, MetricQuery, MetricStore, PartitionInfo};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rosmon_common::types::{AlertEvent, MetricSample, Severity};
use std::collections::HashMap;
use std::path::Path;

pub struct SqliteMetricStore {
    partitions: PartitionManager,
}

impl SqliteMetricStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        Ok(Self {
            partitions: PartitionManager::new(data_dir)?,
        })
    }
}

impl MetricStore for SqliteMetricStore {
    fn append_batch(&self, samples: &[MetricSample]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        // Samples may straddle a partition boundary around midnight
        let mut by_partition: HashMap<String, Vec<&MetricSample>> = HashMap::new();
        for sample in samples {
            let key = self.partitions.get_or_create(sample.timestamp)?;
            by_partition.entry(key).or_default().push(sample);
        }

        for (key, group) in by_partition {
            self.partitions.with_partition(&key, |conn| {
                let tx = conn.unchecked_transaction()?;
                {
                    let mut stmt = tx.prepare_cached(
                        "INSERT INTO metrics (id, device_id, metric_type, metric_name, value, timestamp)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    )?;
                    for sample in &group {
                        stmt.execute(rusqlite::params![
                            &sample.id,
                            &sample.device_id,
                            &sample.metric_type,
                            &sample.metric_name,
                            sample.value,
                            sample.timestamp.timestamp_millis(),
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })?;
        }
        Ok(())
    }

    fn query(&self, query: &MetricQuery) -> Result<Vec<MetricSample>> {
        let to = query.to.unwrap_or_else(Utc::now);
        let from = query.from.unwrap_or(to - Duration::hours(24));
        let limit = clamp_limit(query.limit);
        let from_ms = from.timestamp_millis();
        let to_ms = to.timestamp_millis();

        let keys = self.partitions.partitions_in_range(from, to)?;
        let mut newest_first: Vec<MetricSample> = Vec::new();

        // Walk partitions newest-first so a truncating limit keeps the
        // newest samples; the page is reversed to oldest-first at the end.
        for key in keys.iter().rev() {
            if newest_first.len() >= limit {
                break;
            }
            let remaining = limit - newest_first.len();

            self.partitions.with_partition(key, |conn| {
                let mut sql = String::from(
                    "SELECT id, device_id, metric_type, metric_name, value, timestamp
                     FROM metrics
                     WHERE device_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3",
                );
                let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
                    Box::new(query.device_id.clone()),
                    Box::new(from_ms),
                    Box::new(to_ms),
                ];

                if let Some(metric_type) = &query.metric_type {
                    params.push(Box::new(metric_type.clone()));
                    sql.push_str(&format!(" AND metric_type = ?{}", params.len()));
                }
                if let Some(metric_name) = &query.metric_name {
                    params.push(Box::new(metric_name.clone()));
                    sql.push_str(&format!(" AND metric_name = ?{}", params.len()));
                }

                sql.push_str(&format!(" ORDER BY timestamp DESC LIMIT {remaining}"));

                let mut stmt = conn.prepare(&sql)?;
                let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                    params.iter().map(|p| p.as_ref()).collect();
                let rows = stmt.query_map(param_refs.as_slice(), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, f64>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                })?;

                for row in rows {
                    let (id, device_id, metric_type, metric_name, value, ts_ms) = row?;
                    newest_first.push(MetricSample {
                        id,
                        device_id,
                        metric_type,
                        metric_name,
                        value,
                        timestamp: DateTime::from_timestamp_millis(ts_ms).unwrap_or_default(),
                    });
                }
                Ok(())
            })?;
        }

        newest_first.reverse();
        Ok(newest_first)
    }

    fn write_alert_event(&self, event: &AlertEvent) -> Result<()> {
        let key = self.partitions.get_or_create(event.fired_at)?;
        self.partitions.with_partition(&key, |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO alert_events
                 (id, rule_id, rule_name, device_id, metric_type, metric_name, severity, operator,
                  message, value, threshold, fired_at, acknowledged, acknowledged_by, acknowledged_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                rusqlite::params![
                    &event.id,
                    &event.rule_id,
                    &event.rule_name,
                    &event.device_id,
                    &event.metric_type,
                    &event.metric_name,
                    event.severity.to_string(),
                    &event.operator,
                    &event.message,
                    event.value,
                    event.threshold,
                    event.fired_at.timestamp_millis(),
                    event.acknowledged as i64,
                    event.acknowledged_by.as_deref(),
                    event.acknowledged_at.map(|t| t.timestamp_millis()),
                ],
            )?;
            Ok(())
        })
    }

    fn query_alert_history(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        device_id: Option<&str>,
        acknowledged: Option<bool>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AlertEvent>> {
        let keys = self.partitions.partitions_in_range(from, to)?;
        let mut results = Vec::new();
        let from_ms = from.timestamp_millis();
        let to_ms = to.timestamp_millis();

        for key in keys {
            self.partitions.with_partition(&key, |conn| {
                let mut sql = String::from(
                    "SELECT id, rule_id, rule_name, device_id, metric_type, metric_name, severity,
                            operator, message, value, threshold, fired_at, acknowledged,
                            acknowledged_by, acknowledged_at
                     FROM alert_events WHERE fired_at >= ?1 AND fired_at <= ?2",
                );
                let mut params: Vec<Box<dyn rusqlite::types::ToSql>> =
                    vec![Box::new(from_ms), Box::new(to_ms)];

                if let Some(did) = device_id {
                    params.push(Box::new(did.to_string()));
                    sql.push_str(&format!(" AND device_id = ?{}", params.len()));
                }
                if let Some(acked) = acknowledged {
                    params.push(Box::new(acked as i64));
                    sql.push_str(&format!(" AND acknowledged = ?{}", params.len()));
                }

                sql.push_str(" ORDER BY fired_at DESC");

                let mut stmt = conn.prepare(&sql)?;
                let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                    params.iter().map(|p| p.as_ref()).collect();
                let rows = stmt.query_map(param_refs.as_slice(), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, f64>(9)?,
                        row.get::<_, f64>(10)?,
                        row.get::<_, i64>(11)?,
                        row.get::<_, i64>(12)?,
                        row.get::<_, Option<String>>(13)?,
                        row.get::<_, Option<i64>>(14)?,
                    ))
                })?;

                for row in rows {
                    let (
                        id,
                        rule_id,
                        rule_name,
                        device_id,
                        metric_type,
                        metric_name,
                        severity_str,
                        operator,
                        message,
                        value,
                        threshold,
                        fired_ms,
                        acked,
                        acked_by,
                        acked_at_ms,
                    ) = row?;
                    results.push(AlertEvent {
                        id,
                        rule_id,
                        rule_name,
                        device_id,
                        metric_type,
                        metric_name,
                        severity: severity_str.parse::<Severity>().unwrap_or(Severity::Info),
                        operator,
                        message,
                        value,
                        threshold,
                        fired_at: DateTime::from_timestamp_millis(fired_ms).unwrap_or_default(),
                        acknowledged: acked != 0,
                        acknowledged_by: acked_by,
                        acknowledged_at: acked_at_ms.and_then(DateTime::from_timestamp_millis),
                    });
                }
                Ok(())
            })?;
        }

        results.sort_by(|a, b| b.fired_at.cmp(&a.fired_at));
        Ok(results.into_iter().skip(offset).take(limit).collect())
    }

    fn acknowledge_alert(&self, event_id: &str, actor: &str) -> Result<bool> {
        self.partitions.acknowledge_alert(event_id, actor)
    }

    fn cleanup(&self, retention_days: u32) -> Result<u32> {
        self.partitions.cleanup_older_than(retention_days)
    }

    fn list_partitions(&self) -> Result<Vec<PartitionInfo>> {
        self.partitions.list_partition_info()
    }
}
