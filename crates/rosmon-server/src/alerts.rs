use crate::state::AppState;
use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use rosmon_alert::{AlertRule, CompareOp};
use rosmon_notify::manager::NotifyRouting;
use rosmon_storage::registry::AlertRuleRow;
use rosmon_storage::MetricQuery;
use std::time::Duration;
use tokio::time::interval;

/// Periodic alert-check loop, independent of the metrics poll loop.
///
/// Each tick loads the enabled rules, resolves their target devices, and
/// evaluates recent sample windows through the engine. A single rule's or
/// device's failure never aborts the tick.
pub struct AlertScheduler {
    state: AppState,
    tick: Duration,
}

impl AlertScheduler {
    pub fn new(state: AppState) -> Self {
        let tick = Duration::from_secs(state.config.alerts.interval_secs);
        Self { state, tick }
    }

    pub async fn run(&self) {
        tracing::info!(
            interval_secs = self.tick.as_secs(),
            "Alert check scheduler started"
        );

        let mut tick = interval(self.tick);
        loop {
            tick.tick().await;
            if let Err(e) = self.check_rules().await {
                tracing::error!(error = %e, "Alert check cycle failed");
            }
        }
    }

    /// Executes one alert-check cycle. Public so tests can drive cycles
    /// without the timing loop.
    pub async fn check_rules(&self) -> Result<()> {
        let rule_rows = self.state.registry.list_alert_rules(true)?;
        if rule_rows.is_empty() {
            return Ok(());
        }
        let devices = self.state.registry.list_devices(true)?;
        let now = Utc::now();

        // Window: the sustain duration plus two poll intervals of margin,
        // so duration rules always see enough history.
        let margin = self.state.config.poll.interval_secs * 2;

        for row in rule_rows {
            let rule = match build_rule(&row) {
                Ok(rule) => rule,
                Err(e) => {
                    tracing::error!(rule_id = %row.id, error = %e, "Skipping malformed rule");
                    continue;
                }
            };

            for device in devices.iter().filter(|d| rule.matches_device(&d.id)) {
                let window_secs = rule.duration_secs + margin;
                let query = MetricQuery {
                    device_id: device.id.clone(),
                    metric_type: Some(rule.metric_type.clone()),
                    metric_name: Some(rule.metric_name.clone()),
                    from: Some(now - ChronoDuration::seconds(window_secs as i64)),
                    to: Some(now),
                    limit: None,
                };
                let window = match self.state.store.query(&query) {
                    Ok(window) => window,
                    Err(e) => {
                        tracing::error!(
                            rule_id = %rule.id,
                            device_id = %device.id,
                            error = %e,
                            "Metric window query failed"
                        );
                        continue;
                    }
                };

                let event = {
                    let mut engine = self
                        .state
                        .engine
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    engine.evaluate(&rule, &device.id, &window, now)
                };

                if let Some(event) = event {
                    tracing::info!(
                        rule_id = %event.rule_id,
                        device_id = %event.device_id,
                        metric = %format!("{}/{}", event.metric_type, event.metric_name),
                        value = event.value,
                        threshold = event.threshold,
                        "Alert fired"
                    );
                    if let Err(e) = self.state.store.write_alert_event(&event) {
                        tracing::error!(error = %e, "Failed to persist alert event");
                    }

                    let routing = routing_from_row(&row);
                    let notifier = self.state.notifier.clone();
                    tokio::spawn(async move {
                        notifier.notify(&event, &routing).await;
                    });
                }
            }
        }

        Ok(())
    }
}

/// Converts a stored rule row into engine evaluation data. Fails on rows
/// with an operator or severity outside the closed sets (possible only if
/// the database was edited by hand).
pub fn build_rule(row: &AlertRuleRow) -> Result<AlertRule> {
    let operator: CompareOp = row
        .operator
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let severity = row
        .severity
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    Ok(AlertRule {
        id: row.id.clone(),
        name: row.name.clone(),
        device_pattern: row.device_pattern.clone(),
        metric_type: row.metric_type.clone(),
        metric_name: row.metric_name.clone(),
        operator,
        threshold: row.threshold,
        duration_secs: row.duration_secs,
        severity,
        enabled: row.enabled,
    })
}

pub fn routing_from_row(row: &AlertRuleRow) -> NotifyRouting {
    NotifyRouting {
        email: row.notify_email,
        telegram: row.notify_telegram,
        email_recipients: row
            .email_recipients
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect(),
        message_template: row.message_template.clone(),
    }
}
