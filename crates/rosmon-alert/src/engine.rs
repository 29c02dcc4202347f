use crate::AlertRule;
use chrono::{DateTime, Duration, Utc};
use rosmon_common::types::{AlertEvent, MetricSample};
use std::collections::HashMap;
use tracing;

/// Key: (rule_id, device_id)
type StateKey = (String, String);

/// Per-(rule, device) breach tracking.
#[derive(Debug, Clone, Copy, PartialEq)]
enum RuleState {
    Normal,
    Breaching { since: DateTime<Utc> },
    Fired,
}

/// Evaluates alert rules against metric windows and tracks breach state.
///
/// The state machine per (rule, device) is
/// `Normal -> Breaching -> Fired -> Normal`: a rule fires once when its
/// condition has held for at least `duration_secs`, then stays silent
/// until the condition clears and breaches again.
pub struct AlertEngine {
    states: HashMap<StateKey, RuleState>,
}

impl AlertEngine {
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
        }
    }

    /// Evaluates one rule against a window of samples for one device.
    /// The window must be filtered to the rule's metric and ordered
    /// oldest-first; the latest sample decides the current breach.
    ///
    /// Returns an [`AlertEvent`] exactly on the Breaching -> Fired
    /// transition.
    pub fn evaluate(
        &mut self,
        rule: &AlertRule,
        device_id: &str,
        window: &[MetricSample],
        now: DateTime<Utc>,
    ) -> Option<AlertEvent> {
        let key = (rule.id.clone(), device_id.to_string());

        if !rule.enabled {
            // Disabled rules carry no state at all.
            self.states.remove(&key);
            return None;
        }

        let latest = window.last()?;
        if !rule.operator.check(latest.value, rule.threshold) {
            // Condition cleared: Fired or Breaching both revert to Normal.
            if self.states.remove(&key).is_some() {
                tracing::debug!(
                    rule_id = %rule.id,
                    device_id,
                    "Alert condition cleared"
                );
            }
            return None;
        }

        // Start of the contiguous breaching run ending at the latest
        // sample. Samples evicted from the window are covered by the
        // stored `since` when the run reaches the window start.
        let run_start = contiguous_breach_start(rule, window);

        let state = *self.states.get(&key).unwrap_or(&RuleState::Normal);
        let since = match state {
            RuleState::Fired => {
                // Still breaching after firing: edge-triggered, stay quiet.
                return None;
            }
            RuleState::Breaching { since } => {
                // The stored start survives only while the unbroken run
                // reaches the window start; any dip restarts the clock.
                let run_covers_window = window
                    .first()
                    .map(|s| s.timestamp == run_start)
                    .unwrap_or(false);
                if run_covers_window && since < run_start {
                    since
                } else {
                    run_start
                }
            }
            RuleState::Normal => run_start,
        };

        let sustained = now - since >= Duration::seconds(rule.duration_secs as i64);
        if rule.duration_secs == 0 || sustained {
            self.states.insert(key, RuleState::Fired);
            Some(make_event(rule, device_id, latest, now))
        } else {
            self.states.insert(key, RuleState::Breaching { since });
            None
        }
    }

    /// Discards tracked state for a deleted rule.
    pub fn remove_rule(&mut self, rule_id: &str) {
        self.states.retain(|(rid, _), _| rid != rule_id);
    }

    /// Discards tracked state for a deleted device.
    pub fn remove_device(&mut self, device_id: &str) {
        self.states.retain(|(_, did), _| did != device_id);
    }

    /// Clears all tracked state. Called when the rule set is reloaded, so
    /// an edited rule behaves like a new one.
    pub fn reset(&mut self) {
        self.states.clear();
    }
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Timestamp of the first sample in the unbroken breaching run that ends
/// at the last window sample. The caller guarantees the last sample
/// breaches.
fn contiguous_breach_start(rule: &AlertRule, window: &[MetricSample]) -> DateTime<Utc> {
    let mut start = window[window.len() - 1].timestamp;
    for sample in window.iter().rev() {
        if rule.operator.check(sample.value, rule.threshold) {
            start = sample.timestamp;
        } else {
            break;
        }
    }
    start
}

fn make_event(
    rule: &AlertRule,
    device_id: &str,
    latest: &MetricSample,
    now: DateTime<Utc>,
) -> AlertEvent {
    AlertEvent {
        id: rosmon_common::id::next_id(),
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        device_id: device_id.to_string(),
        metric_type: rule.metric_type.clone(),
        metric_name: rule.metric_name.clone(),
        severity: rule.severity,
        operator: rule.operator.to_string(),
        message: format!(
            "{}/{} is {} {} (observed {:.2}) on device {}",
            rule.metric_type,
            rule.metric_name,
            rule.operator,
            rule.threshold,
            latest.value,
            device_id,
        ),
        value: latest.value,
        threshold: rule.threshold,
        fired_at: now,
        acknowledged: false,
        acknowledged_by: None,
        acknowledged_at: None,
    }
}
