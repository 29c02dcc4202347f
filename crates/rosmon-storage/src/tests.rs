use crate::engine::SqliteMetricStore;
use crate::registry::{DeviceRegistry, NewAlertRule, NewDevice, UpdateDevice};
use crate::{MetricQuery, MetricStore, MAX_QUERY_LIMIT};
use chrono::{Duration, Utc};
use rosmon_common::types::{AlertEvent, MetricSample, Severity};
use tempfile::TempDir;

fn setup() -> (TempDir, SqliteMetricStore) {
    rosmon_common::id::init(1, 1);
    let dir = TempDir::new().unwrap();
    let store = SqliteMetricStore::new(dir.path()).unwrap();
    (dir, store)
}

fn make_samples(device: &str, metric: (&str, &str), values: &[(f64, i64)]) -> Vec<MetricSample> {
    let now = Utc::now();
    values
        .iter()
        .map(|(value, secs_ago)| MetricSample {
            id: rosmon_common::id::next_id(),
            device_id: device.to_string(),
            metric_type: metric.0.to_string(),
            metric_name: metric.1.to_string(),
            value: *value,
            timestamp: now - Duration::seconds(*secs_ago),
        })
        .collect()
}

fn make_event(id: &str, device: &str, secs_ago: i64) -> AlertEvent {
    AlertEvent {
        id: id.to_string(),
        rule_id: "cpu-high".to_string(),
        rule_name: "CPU load too high".to_string(),
        device_id: device.to_string(),
        metric_type: "cpu".to_string(),
        metric_name: "load".to_string(),
        severity: Severity::Critical,
        operator: ">".to_string(),
        message: "cpu/load is > 80 on device".to_string(),
        value: 95.0,
        threshold: 80.0,
        fired_at: Utc::now() - Duration::seconds(secs_ago),
        acknowledged: false,
        acknowledged_by: None,
        acknowledged_at: None,
    }
}

#[test]
fn write_and_query_metrics_oldest_first() {
    let (_dir, store) = setup();

    let samples = make_samples("gw-01", ("cpu", "load"), &[(95.0, 10), (90.0, 5), (85.0, 0)]);
    store.append_batch(&samples).unwrap();

    let results = store
        .query(&MetricQuery {
            device_id: "gw-01".to_string(),
            metric_type: Some("cpu".to_string()),
            metric_name: Some("load".to_string()),
            from: Some(Utc::now() - Duration::minutes(1)),
            to: Some(Utc::now() + Duration::seconds(1)),
            limit: None,
        })
        .unwrap();

    assert_eq!(results.len(), 3);
    assert!(results[0].timestamp <= results[1].timestamp);
    assert!(results[1].timestamp <= results[2].timestamp);
}

#[test]
fn query_filters_by_metric_selector() {
    let (_dir, store) = setup();

    let mut samples = make_samples("gw-01", ("cpu", "load"), &[(95.0, 10)]);
    samples.extend(make_samples("gw-01", ("memory", "usage"), &[(40.0, 5)]));
    store.append_batch(&samples).unwrap();

    let results = store
        .query(&MetricQuery {
            device_id: "gw-01".to_string(),
            metric_type: Some("memory".to_string()),
            metric_name: Some("usage".to_string()),
            from: Some(Utc::now() - Duration::minutes(1)),
            to: Some(Utc::now()),
            limit: None,
        })
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].value, 40.0);
}

#[test]
fn truncating_limit_keeps_newest_samples() {
    let (_dir, store) = setup();

    let values: Vec<(f64, i64)> = (0..10).map(|i| (i as f64, (9 - i) * 10)).collect();
    let samples = make_samples("gw-01", ("cpu", "load"), &values);
    store.append_batch(&samples).unwrap();

    let results = store
        .query(&MetricQuery {
            device_id: "gw-01".to_string(),
            metric_type: None,
            metric_name: None,
            from: Some(Utc::now() - Duration::minutes(5)),
            to: Some(Utc::now()),
            limit: Some(3),
        })
        .unwrap();

    // The 3 newest samples (values 7, 8, 9), page ordered oldest-first
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].value, 7.0);
    assert_eq!(results[2].value, 9.0);
}

#[test]
fn limit_above_hard_maximum_is_clamped() {
    assert_eq!(crate::clamp_limit(Some(1_000_000)), MAX_QUERY_LIMIT);
    assert_eq!(crate::clamp_limit(Some(0)), 1);
    assert_eq!(crate::clamp_limit(None), crate::DEFAULT_QUERY_LIMIT);
}

#[test]
fn query_empty_result() {
    let (_dir, store) = setup();

    let results = store
        .query(&MetricQuery {
            device_id: "nonexistent".to_string(),
            metric_type: None,
            metric_name: None,
            from: Some(Utc::now() - Duration::hours(1)),
            to: Some(Utc::now()),
            limit: None,
        })
        .unwrap();
    assert!(results.is_empty());
}

#[test]
fn write_and_query_alert_events() {
    let (_dir, store) = setup();

    store.write_alert_event(&make_event("alert-1", "gw-01", 0)).unwrap();

    let results = store
        .query_alert_history(
            Utc::now() - Duration::minutes(1),
            Utc::now() + Duration::seconds(1),
            None,
            None,
            100,
            0,
        )
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "alert-1");
    assert_eq!(results[0].severity, Severity::Critical);
    assert!(!results[0].acknowledged);
}

#[test]
fn alert_history_filters_and_orders_newest_first() {
    let (_dir, store) = setup();

    store.write_alert_event(&make_event("alert-1", "gw-01", 30)).unwrap();
    store.write_alert_event(&make_event("alert-2", "gw-02", 20)).unwrap();
    store.write_alert_event(&make_event("alert-3", "gw-01", 10)).unwrap();

    let all = store
        .query_alert_history(
            Utc::now() - Duration::minutes(5),
            Utc::now(),
            None,
            None,
            100,
            0,
        )
        .unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].id, "alert-3");

    let gw01 = store
        .query_alert_history(
            Utc::now() - Duration::minutes(5),
            Utc::now(),
            Some("gw-01"),
            None,
            100,
            0,
        )
        .unwrap();
    assert_eq!(gw01.len(), 2);
}

#[test]
fn acknowledge_alert_sets_fields_exactly_once() {
    let (_dir, store) = setup();

    store.write_alert_event(&make_event("alert-1", "gw-01", 0)).unwrap();

    assert!(store.acknowledge_alert("alert-1", "operator").unwrap());
    // Second acknowledgement is a no-op
    assert!(!store.acknowledge_alert("alert-1", "someone-else").unwrap());
    assert!(!store.acknowledge_alert("missing", "operator").unwrap());

    let results = store
        .query_alert_history(
            Utc::now() - Duration::minutes(5),
            Utc::now(),
            None,
            Some(true),
            100,
            0,
        )
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].acknowledged);
    assert_eq!(results[0].acknowledged_by.as_deref(), Some("operator"));
    assert!(results[0].acknowledged_at.is_some());
}

// ---- Registry ----

fn new_device(name: &str) -> NewDevice {
    NewDevice {
        name: name.to_string(),
        address: "192.0.2.1".to_string(),
        username: "admin".to_string(),
        secret: "router-secret-42".to_string(),
        api_port: 443,
        use_tls: true,
        model: Some("RB4011iGS+".to_string()),
        location: None,
        notes: None,
        enabled: true,
    }
}

fn new_rule(name: &str) -> NewAlertRule {
    NewAlertRule {
        name: name.to_string(),
        device_pattern: "*".to_string(),
        metric_type: "cpu".to_string(),
        metric_name: "load".to_string(),
        operator: ">".to_string(),
        threshold: 80.0,
        duration_secs: 0,
        severity: "critical".to_string(),
        enabled: true,
        notify_email: false,
        notify_telegram: false,
        email_recipients: String::new(),
        message_template: String::new(),
    }
}

#[test]
fn device_crud_round_trip() {
    rosmon_common::id::init(1, 1);
    let dir = TempDir::new().unwrap();
    let registry = DeviceRegistry::new(dir.path()).unwrap();

    let device = registry.insert_device(&new_device("gw-01")).unwrap();
    assert_eq!(device.name, "gw-01");
    assert!(device.enabled);

    let listed = registry.list_devices(true).unwrap();
    assert_eq!(listed.len(), 1);

    let updated = registry
        .update_device(
            &device.id,
            &UpdateDevice {
                location: Some("rack 3".to_string()),
                enabled: Some(false),
                ..Default::default()
            },
        )
        .unwrap()
        .unwrap();
    assert_eq!(updated.location.as_deref(), Some("rack 3"));
    assert!(!updated.enabled);
    assert!(registry.list_devices(true).unwrap().is_empty());

    assert!(registry.delete_device(&device.id).unwrap());
    assert!(registry.get_device(&device.id).unwrap().is_none());
}

#[test]
fn device_secret_round_trips_but_is_not_stored_in_plaintext() {
    rosmon_common::id::init(1, 1);
    let dir = TempDir::new().unwrap();
    let registry = DeviceRegistry::new(dir.path()).unwrap();

    let device = registry.insert_device(&new_device("gw-01")).unwrap();
    let secret = registry.device_secret(&device.id).unwrap().unwrap();
    assert_eq!(secret, "router-secret-42");

    drop(registry);
    // The raw database file must not contain the plaintext credential
    let raw = std::fs::read(dir.path().join("registry.db")).unwrap();
    let needle = b"router-secret-42";
    let found = raw.windows(needle.len()).any(|w| w == needle);
    assert!(!found, "plaintext secret found in registry database");
}

#[test]
fn device_validation_rejects_bad_input() {
    rosmon_common::id::init(1, 1);
    let dir = TempDir::new().unwrap();
    let registry = DeviceRegistry::new(dir.path()).unwrap();

    let mut device = new_device("gw-01");
    device.secret = String::new();
    assert!(registry.insert_device(&device).is_err());

    let mut device = new_device("gw-01");
    device.api_port = 0;
    assert!(registry.insert_device(&device).is_err());

    let mut device = new_device("  ");
    device.name = "  ".to_string();
    assert!(registry.insert_device(&device).is_err());
}

#[test]
fn update_device_reports_connection_relevant_changes() {
    let update = UpdateDevice {
        notes: Some("rewired".to_string()),
        ..Default::default()
    };
    assert!(!update.connection_relevant());

    let update = UpdateDevice {
        address: Some("192.0.2.9".to_string()),
        ..Default::default()
    };
    assert!(update.connection_relevant());

    let update = UpdateDevice {
        secret: Some("new-secret".to_string()),
        ..Default::default()
    };
    assert!(update.connection_relevant());
}

#[test]
fn rule_crud_and_validation() {
    rosmon_common::id::init(1, 1);
    let dir = TempDir::new().unwrap();
    let registry = DeviceRegistry::new(dir.path()).unwrap();

    let rule = registry.insert_alert_rule(&new_rule("cpu high")).unwrap();
    assert_eq!(rule.operator, ">");
    assert_eq!(registry.list_alert_rules(true).unwrap().len(), 1);

    // Unknown operator is rejected outright
    let mut bad = new_rule("bad op");
    bad.operator = "!=".to_string();
    assert!(registry.insert_alert_rule(&bad).is_err());

    // Selector must resolve to a produced metric
    let mut bad = new_rule("bad metric");
    bad.metric_type = "gpu".to_string();
    assert!(registry.insert_alert_rule(&bad).is_err());

    // Severity must parse
    let mut bad = new_rule("bad severity");
    bad.severity = "catastrophic".to_string();
    assert!(registry.insert_alert_rule(&bad).is_err());

    assert!(registry.delete_alert_rule(&rule.id).unwrap());
    assert!(registry.get_alert_rule(&rule.id).unwrap().is_none());
}

#[test]
fn deleting_device_removes_rules_targeting_it() {
    rosmon_common::id::init(1, 1);
    let dir = TempDir::new().unwrap();
    let registry = DeviceRegistry::new(dir.path()).unwrap();

    let device = registry.insert_device(&new_device("gw-01")).unwrap();

    let mut rule = new_rule("device specific");
    rule.device_pattern = device.id.clone();
    registry.insert_alert_rule(&rule).unwrap();

    let wildcard = registry.insert_alert_rule(&new_rule("wildcard")).unwrap();

    assert!(registry.delete_device(&device.id).unwrap());
    let remaining = registry.list_alert_rules(false).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, wildcard.id);
}
