//! Threshold alert evaluation for device metrics.
//!
//! Rules compare the latest sample of a selected metric against a fixed
//! threshold with one of a closed set of operators, optionally requiring
//! the breach to be sustained for a minimum duration. Firing is
//! edge-triggered: one alert per transition into the breaching state, no
//! re-fire until the condition clears and triggers again.

pub mod engine;

#[cfg(test)]
mod tests;

use rosmon_common::types::Severity;
use std::str::FromStr;

/// Comparison operators permitted in alert rules. The set is closed:
/// anything else is rejected at rule creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    GreaterThan,
    LessThan,
    GreaterEqual,
    LessEqual,
    Equal,
}

impl CompareOp {
    /// Absolute tolerance for `==` on floating-point metrics. Device
    /// metrics are low-precision percentages and counters, so exact
    /// equality would almost never fire.
    pub const EPSILON: f64 = 1e-6;

    pub fn check(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
            Self::GreaterEqual => value >= threshold,
            Self::LessEqual => value <= threshold,
            Self::Equal => (value - threshold).abs() <= Self::EPSILON,
        }
    }
}

impl FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">" => Ok(Self::GreaterThan),
            "<" => Ok(Self::LessThan),
            ">=" => Ok(Self::GreaterEqual),
            "<=" => Ok(Self::LessEqual),
            "==" => Ok(Self::Equal),
            _ => Err(format!("unknown compare operator: {s}")),
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GreaterThan => write!(f, ">"),
            Self::LessThan => write!(f, "<"),
            Self::GreaterEqual => write!(f, ">="),
            Self::LessEqual => write!(f, "<="),
            Self::Equal => write!(f, "=="),
        }
    }
}

/// Evaluation data for one alert rule. Notification routing fields live
/// with the persisted rule row; the engine only needs the comparison.
#[derive(Debug, Clone)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    /// Exact device id or a glob pattern (`*` matches all devices).
    pub device_pattern: String,
    pub metric_type: String,
    pub metric_name: String,
    pub operator: CompareOp,
    pub threshold: f64,
    /// Minimum sustained breach before firing; 0 fires on first breach.
    pub duration_secs: u64,
    pub severity: Severity,
    pub enabled: bool,
}

impl AlertRule {
    pub fn matches_device(&self, device_id: &str) -> bool {
        if self.device_pattern == "*" {
            return true;
        }
        glob_match::glob_match(&self.device_pattern, device_id)
    }
}
