use crate::engine::AlertEngine;
use crate::{AlertRule, CompareOp};
use chrono::{Duration, Utc};
use rosmon_common::types::{MetricSample, Severity};

fn make_sample(device: &str, value: f64, secs_ago: i64) -> MetricSample {
    MetricSample {
        id: rosmon_common::id::next_id(),
        device_id: device.to_string(),
        metric_type: "cpu".to_string(),
        metric_name: "load".to_string(),
        value,
        timestamp: Utc::now() - Duration::seconds(secs_ago),
    }
}

fn cpu_rule(operator: CompareOp, threshold: f64, duration_secs: u64) -> AlertRule {
    AlertRule {
        id: "cpu-high".to_string(),
        name: "CPU load too high".to_string(),
        device_pattern: "*".to_string(),
        metric_type: "cpu".to_string(),
        metric_name: "load".to_string(),
        operator,
        threshold,
        duration_secs,
        severity: Severity::Critical,
        enabled: true,
    }
}

#[test]
fn compare_op_parses_only_the_closed_set() {
    assert_eq!(">".parse::<CompareOp>().unwrap(), CompareOp::GreaterThan);
    assert_eq!("<".parse::<CompareOp>().unwrap(), CompareOp::LessThan);
    assert_eq!(">=".parse::<CompareOp>().unwrap(), CompareOp::GreaterEqual);
    assert_eq!("<=".parse::<CompareOp>().unwrap(), CompareOp::LessEqual);
    assert_eq!("==".parse::<CompareOp>().unwrap(), CompareOp::Equal);
    assert!("!=".parse::<CompareOp>().is_err());
    assert!("gt".parse::<CompareOp>().is_err());
}

#[test]
fn equal_uses_epsilon_tolerance() {
    let op = CompareOp::Equal;
    assert!(op.check(80.0, 80.0));
    assert!(op.check(80.0 + 1e-9, 80.0));
    assert!(!op.check(80.1, 80.0));
}

#[test]
fn zero_duration_fires_immediately_and_is_edge_triggered() {
    rosmon_common::id::init(1, 1);
    let rule = cpu_rule(CompareOp::GreaterThan, 80.0, 0);
    let mut engine = AlertEngine::new();
    let now = Utc::now();

    // First breaching snapshot fires exactly one alert
    let window = vec![make_sample("gw-01", 85.0, 0)];
    let event = engine.evaluate(&rule, "gw-01", &window, now);
    assert!(event.is_some());
    let event = event.unwrap();
    assert_eq!(event.value, 85.0);
    assert_eq!(event.threshold, 80.0);
    assert_eq!(event.operator, ">");

    // Still at 85: no second alert while breaching
    let window = vec![make_sample("gw-01", 85.0, 60), make_sample("gw-01", 85.0, 0)];
    assert!(engine.evaluate(&rule, "gw-01", &window, now).is_none());

    // Drops below the threshold: condition clears, no event
    let window = vec![make_sample("gw-01", 70.0, 0)];
    assert!(engine.evaluate(&rule, "gw-01", &window, now).is_none());

    // Rises above again: fires a second time
    let window = vec![make_sample("gw-01", 90.0, 0)];
    assert!(engine.evaluate(&rule, "gw-01", &window, now).is_some());
}

#[test]
fn duration_rule_does_not_fire_on_single_fresh_breach() {
    rosmon_common::id::init(1, 1);
    let rule = cpu_rule(CompareOp::GreaterThan, 80.0, 60);
    let mut engine = AlertEngine::new();

    let window = vec![make_sample("gw-01", 95.0, 0)];
    assert!(engine
        .evaluate(&rule, "gw-01", &window, Utc::now())
        .is_none());
}

#[test]
fn duration_rule_fires_after_sustained_breach() {
    rosmon_common::id::init(1, 1);
    let rule = cpu_rule(CompareOp::GreaterThan, 80.0, 60);
    let mut engine = AlertEngine::new();
    let now = Utc::now();

    // Breach begins 90 seconds ago and holds across all samples
    let window = vec![
        make_sample("gw-01", 95.0, 90),
        make_sample("gw-01", 96.0, 60),
        make_sample("gw-01", 97.0, 30),
        make_sample("gw-01", 98.0, 0),
    ];
    let event = engine.evaluate(&rule, "gw-01", &window, now);
    assert!(event.is_some());
}

#[test]
fn duration_rule_reverts_to_normal_when_breach_clears_early() {
    rosmon_common::id::init(1, 1);
    let rule = cpu_rule(CompareOp::GreaterThan, 80.0, 60);
    let mut engine = AlertEngine::new();
    let now = Utc::now();

    // Enter Breaching
    let window = vec![make_sample("gw-01", 95.0, 10)];
    assert!(engine.evaluate(&rule, "gw-01", &window, now).is_none());

    // Clears before the duration elapses: back to Normal, nothing fired
    let window = vec![make_sample("gw-01", 95.0, 10), make_sample("gw-01", 50.0, 0)];
    assert!(engine.evaluate(&rule, "gw-01", &window, now).is_none());

    // A later fresh breach must sustain the full duration again
    let window = vec![make_sample("gw-01", 50.0, 30), make_sample("gw-01", 95.0, 0)];
    assert!(engine.evaluate(&rule, "gw-01", &window, now).is_none());
}

#[test]
fn mid_window_clear_restarts_the_breach_run() {
    rosmon_common::id::init(1, 1);
    let rule = cpu_rule(CompareOp::GreaterThan, 80.0, 60);
    let mut engine = AlertEngine::new();
    let now = Utc::now();

    // Old breach, a dip below threshold, then a fresh 30s breach: the dip
    // means the current run has not yet sustained 60 seconds.
    let window = vec![
        make_sample("gw-01", 95.0, 120),
        make_sample("gw-01", 50.0, 90),
        make_sample("gw-01", 95.0, 30),
        make_sample("gw-01", 96.0, 0),
    ];
    assert!(engine.evaluate(&rule, "gw-01", &window, now).is_none());
}

#[test]
fn dip_after_entering_breaching_restarts_the_clock() {
    rosmon_common::id::init(1, 1);
    let rule = cpu_rule(CompareOp::GreaterThan, 80.0, 60);
    let mut engine = AlertEngine::new();
    let t0 = Utc::now();

    // Enter Breaching at t0-30
    let window = vec![make_sample("gw-01", 95.0, 30)];
    assert!(engine.evaluate(&rule, "gw-01", &window, t0).is_none());

    // Later evaluation: the original breach start is still in the window
    // but a dip follows it, so the sustained clock restarts at the
    // post-dip sample even though 70 seconds passed since first breach.
    let window = vec![
        make_sample("gw-01", 95.0, 30),
        make_sample("gw-01", 50.0, 20),
        make_sample("gw-01", 95.0, 10),
        make_sample("gw-01", 96.0, 0),
    ];
    let later = t0 + Duration::seconds(40);
    assert!(engine.evaluate(&rule, "gw-01", &window, later).is_none());
}

#[test]
fn disabled_rules_are_skipped_without_state() {
    rosmon_common::id::init(1, 1);
    let mut rule = cpu_rule(CompareOp::GreaterThan, 80.0, 0);
    rule.enabled = false;
    let mut engine = AlertEngine::new();

    let window = vec![make_sample("gw-01", 95.0, 0)];
    assert!(engine
        .evaluate(&rule, "gw-01", &window, Utc::now())
        .is_none());

    // Re-enabling fires immediately: nothing was tracked while disabled
    rule.enabled = true;
    assert!(engine
        .evaluate(&rule, "gw-01", &window, Utc::now())
        .is_some());
}

#[test]
fn state_is_tracked_per_device() {
    rosmon_common::id::init(1, 1);
    let rule = cpu_rule(CompareOp::GreaterThan, 80.0, 0);
    let mut engine = AlertEngine::new();
    let now = Utc::now();

    let window_a = vec![make_sample("gw-01", 95.0, 0)];
    let window_b = vec![make_sample("gw-02", 95.0, 0)];

    // Each device fires independently
    assert!(engine.evaluate(&rule, "gw-01", &window_a, now).is_some());
    assert!(engine.evaluate(&rule, "gw-02", &window_b, now).is_some());
    // And each suppresses independently
    assert!(engine.evaluate(&rule, "gw-01", &window_a, now).is_none());
}

#[test]
fn device_pattern_matching() {
    let mut rule = cpu_rule(CompareOp::GreaterThan, 80.0, 0);
    assert!(rule.matches_device("anything"));

    rule.device_pattern = "gw-*".to_string();
    assert!(rule.matches_device("gw-01"));
    assert!(!rule.matches_device("ap-01"));

    rule.device_pattern = "1234".to_string();
    assert!(rule.matches_device("1234"));
    assert!(!rule.matches_device("12345"));
}

#[test]
fn reset_discards_suppression_state() {
    rosmon_common::id::init(1, 1);
    let rule = cpu_rule(CompareOp::GreaterThan, 80.0, 0);
    let mut engine = AlertEngine::new();
    let now = Utc::now();

    let window = vec![make_sample("gw-01", 95.0, 0)];
    assert!(engine.evaluate(&rule, "gw-01", &window, now).is_some());
    assert!(engine.evaluate(&rule, "gw-01", &window, now).is_none());

    // Rule edits reload the engine; the edited rule may fire again
    engine.reset();
    assert!(engine.evaluate(&rule, "gw-01", &window, now).is_some());
}

#[test]
fn remove_rule_discards_tracked_state() {
    rosmon_common::id::init(1, 1);
    let rule = cpu_rule(CompareOp::GreaterThan, 80.0, 0);
    let mut engine = AlertEngine::new();
    let now = Utc::now();

    let window = vec![make_sample("gw-01", 95.0, 0)];
    assert!(engine.evaluate(&rule, "gw-01", &window, now).is_some());

    engine.remove_rule("cpu-high");
    assert!(engine.evaluate(&rule, "gw-01", &window, now).is_some());
}

#[test]
fn less_than_operator_fires_on_low_values() {
    rosmon_common::id::init(1, 1);
    let mut rule = cpu_rule(CompareOp::LessThan, 10.0, 0);
    rule.metric_type = "temperature".to_string();
    rule.metric_name = "value".to_string();
    let mut engine = AlertEngine::new();

    let mut sample = make_sample("gw-01", 5.0, 0);
    sample.metric_type = "temperature".to_string();
    sample.metric_name = "value".to_string();

    let event = engine.evaluate(&rule, "gw-01", &[sample], Utc::now());
    assert!(event.is_some());
    assert_eq!(event.unwrap().operator, "<");
}
