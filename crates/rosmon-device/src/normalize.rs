//! Converts raw heterogeneous device responses into the fixed metrics
//! schema. Every field access goes through an explicit default: a single
//! missing or malformed field never fails the whole normalization.

use crate::{RawDhcpLease, RawHealth, RawIdentity, RawInterface, RawRegistration, RawResource};
use chrono::Utc;
use rosmon_common::types::{
    DeviceMetricsSnapshot, DhcpLease, InterfaceReport, InterfaceStats, InterfaceTotals,
    WirelessClient,
};

/// Interface types included in normalized reports by default.
pub const DEFAULT_INTERFACE_TYPES: &[&str] = &["ether", "wlan", "bridge"];

/// Memory/disk usage percentage, guarded against degenerate inputs.
/// Returns 0 when `total` is zero; the result is rounded to two decimals
/// and always within `[0, 100]` for `used <= total`.
pub fn usage_percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = used as f64 / total as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

/// Formats an uptime in seconds as a human string via greedy
/// day/hour/minute/second decomposition. Leading zero components are
/// omitted; seconds are always shown.
///
/// # Examples
///
/// ```
/// use rosmon_device::normalize::format_uptime;
///
/// assert_eq!(format_uptime(0), "0s");
/// assert_eq!(format_uptime(90061), "1d 1h 1m 1s");
/// ```
pub fn format_uptime(seconds: u64) -> String {
    let (minutes, secs) = (seconds / 60, seconds % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    let (days, hours) = (hours / 24, hours % 24);

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 || days > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 || hours > 0 || days > 0 {
        parts.push(format!("{minutes}m"));
    }
    parts.push(format!("{secs}s"));
    parts.join(" ")
}

/// Parses a RouterOS uptime value into seconds. Accepts a plain integer,
/// unit-suffixed tokens (`1w2d3h4m5s`), and the `Nd hh:mm:ss` form older
/// firmware emits. Unparseable input yields 0.
pub fn parse_duration_secs(raw: &str) -> u64 {
    let raw = raw.trim();
    if raw.is_empty() {
        return 0;
    }
    if let Ok(secs) = raw.parse::<u64>() {
        return secs;
    }

    let mut total = 0u64;
    let mut number = String::new();
    let mut clock: Vec<u64> = Vec::new();
    for ch in raw.chars() {
        if ch.is_ascii_digit() {
            number.push(ch);
        } else if ch == ':' {
            clock.push(number.parse().unwrap_or(0));
            number.clear();
        } else {
            if !number.is_empty() {
                let part: u64 = number.parse().unwrap_or(0);
                number.clear();
                let unit = match ch {
                    'w' => 7 * 86400,
                    'd' => 86400,
                    'h' => 3600,
                    'm' => 60,
                    's' => 1,
                    _ => 0,
                };
                total = total.saturating_add(part * unit);
            }
        }
    }
    if !clock.is_empty() {
        // hh:mm:ss tail from older firmware
        clock.push(number.parse().unwrap_or(0));
        let mut clock_secs = 0u64;
        for part in &clock {
            clock_secs = clock_secs.saturating_mul(60).saturating_add(*part);
        }
        total = total.saturating_add(clock_secs);
    } else if !number.is_empty() {
        total = total.saturating_add(number.parse().unwrap_or(0));
    }
    total
}

fn parse_u64(raw: &Option<String>) -> u64 {
    raw.as_deref()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0)
}

fn parse_f64(raw: &Option<String>) -> f64 {
    raw.as_deref()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn parse_flag(raw: &Option<String>, default: bool) -> bool {
    match raw.as_deref().map(str::trim) {
        Some("true") | Some("yes") => true,
        Some("false") | Some("no") => false,
        _ => default,
    }
}

fn string_or_unknown(raw: &Option<String>) -> String {
    match raw.as_deref() {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => "Unknown".to_string(),
    }
}

/// Normalizes one resource/identity/health poll into a snapshot.
pub fn normalize_snapshot(
    resource: &RawResource,
    identity: &RawIdentity,
    health: Option<&RawHealth>,
) -> DeviceMetricsSnapshot {
    let memory_total = parse_u64(&resource.total_memory);
    let memory_free = parse_u64(&resource.free_memory);
    let memory_used = memory_total.saturating_sub(memory_free);

    let disk_total = parse_u64(&resource.total_hdd_space);
    let disk_free = parse_u64(&resource.free_hdd_space);
    let disk_used = disk_total.saturating_sub(disk_free);

    let uptime_seconds = resource
        .uptime
        .as_deref()
        .map(parse_duration_secs)
        .unwrap_or(0);

    let temperature = health
        .and_then(|h| h.temperature.as_deref())
        .and_then(|t| t.trim().trim_end_matches('C').trim().parse::<f64>().ok());

    DeviceMetricsSnapshot {
        online: true,
        identity: string_or_unknown(&identity.name),
        model: string_or_unknown(&resource.board_name),
        version: string_or_unknown(&resource.version),
        architecture: string_or_unknown(&resource.architecture_name),
        cpu_count: parse_u64(&resource.cpu_count),
        cpu_load: parse_f64(&resource.cpu_load),
        cpu_frequency_mhz: parse_u64(&resource.cpu_frequency),
        memory_total,
        memory_used,
        memory_usage: usage_percent(memory_used, memory_total),
        disk_total,
        disk_used,
        disk_usage: usage_percent(disk_used, disk_total),
        uptime_seconds,
        uptime: format_uptime(uptime_seconds),
        temperature,
        error: None,
        timestamp: Utc::now(),
    }
}

/// Filters interfaces to the allowed types and coerces flags and counters.
/// Counters that fail to parse fall back to 0 per field; aggregate totals
/// are produced when the filtered set is non-empty.
pub fn normalize_interfaces(
    interfaces: &[RawInterface],
    allowed_types: &[&str],
) -> InterfaceReport {
    let mut stats = Vec::new();
    for iface in interfaces {
        let interface_type = iface.interface_type.as_deref().unwrap_or("");
        if !allowed_types.contains(&interface_type) {
            continue;
        }
        stats.push(InterfaceStats {
            name: iface.name.clone().unwrap_or_default(),
            interface_type: interface_type.to_string(),
            mac_address: iface.mac_address.clone().unwrap_or_default(),
            enabled: !parse_flag(&iface.disabled, true),
            running: parse_flag(&iface.running, false),
            tx_byte: parse_u64(&iface.tx_byte),
            rx_byte: parse_u64(&iface.rx_byte),
            tx_packet: parse_u64(&iface.tx_packet),
            rx_packet: parse_u64(&iface.rx_packet),
            tx_drop: parse_u64(&iface.tx_drop),
            rx_drop: parse_u64(&iface.rx_drop),
            tx_error: parse_u64(&iface.tx_error),
            rx_error: parse_u64(&iface.rx_error),
        });
    }

    let totals = if stats.is_empty() {
        None
    } else {
        Some(InterfaceTotals {
            count: stats.len(),
            running: stats.iter().filter(|s| s.running).count(),
            tx_bytes: stats.iter().map(|s| s.tx_byte).sum(),
            rx_bytes: stats.iter().map(|s| s.rx_byte).sum(),
        })
    };

    InterfaceReport {
        interfaces: stats,
        totals,
    }
}

pub fn normalize_wireless(registrations: &[RawRegistration]) -> Vec<WirelessClient> {
    registrations
        .iter()
        .map(|r| WirelessClient {
            mac_address: r.mac_address.clone().unwrap_or_default(),
            interface: r.interface.clone().unwrap_or_default(),
            signal_strength: r.signal_strength.clone().unwrap_or_default(),
            tx_rate: r.tx_rate.clone().unwrap_or_default(),
            rx_rate: r.rx_rate.clone().unwrap_or_default(),
            uptime: r.uptime.clone().unwrap_or_default(),
        })
        .collect()
}

pub fn normalize_leases(leases: &[RawDhcpLease]) -> Vec<DhcpLease> {
    leases
        .iter()
        .map(|l| DhcpLease {
            mac_address: l.mac_address.clone().unwrap_or_default(),
            address: l.address.clone().unwrap_or_default(),
            host_name: l.host_name.clone().unwrap_or_default(),
            client_id: l.client_id.clone().unwrap_or_default(),
            status: l.status.clone().unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(total_mem: &str, free_mem: &str) -> RawResource {
        RawResource {
            uptime: Some("90061".to_string()),
            version: Some("7.14.2".to_string()),
            board_name: Some("RB4011iGS+".to_string()),
            architecture_name: Some("arm64".to_string()),
            cpu_count: Some("4".to_string()),
            cpu_load: Some("12".to_string()),
            cpu_frequency: Some("1400".to_string()),
            total_memory: Some(total_mem.to_string()),
            free_memory: Some(free_mem.to_string()),
            total_hdd_space: Some("512000".to_string()),
            free_hdd_space: Some("256000".to_string()),
        }
    }

    #[test]
    fn usage_percent_stays_within_bounds() {
        for (free, total) in [(0u64, 100u64), (50, 100), (100, 100), (1, 3)] {
            let used = total - free;
            let pct = usage_percent(used, total);
            assert!((0.0..=100.0).contains(&pct), "{pct} out of range");
        }
    }

    #[test]
    fn usage_percent_zero_total_is_zero() {
        assert_eq!(usage_percent(0, 0), 0.0);
        assert_eq!(usage_percent(42, 0), 0.0);
    }

    #[test]
    fn usage_percent_rounds_to_two_decimals() {
        assert_eq!(usage_percent(1, 3), 33.33);
    }

    #[test]
    fn format_uptime_zero_is_zero_seconds() {
        assert_eq!(format_uptime(0), "0s");
    }

    #[test]
    fn format_uptime_full_decomposition() {
        assert_eq!(format_uptime(90061), "1d 1h 1m 1s");
    }

    #[test]
    fn format_uptime_keeps_zero_middle_components() {
        // 1 day and 5 seconds: hours/minutes are shown as zeros
        assert_eq!(format_uptime(86405), "1d 0h 0m 5s");
        assert_eq!(format_uptime(61), "1m 1s");
    }

    #[test]
    fn parse_duration_handles_all_forms() {
        assert_eq!(parse_duration_secs("90061"), 90061);
        assert_eq!(parse_duration_secs("1d1h1m1s"), 90061);
        assert_eq!(parse_duration_secs("1w"), 604800);
        assert_eq!(parse_duration_secs("2d 01:02:03"), 2 * 86400 + 3723);
        assert_eq!(parse_duration_secs("garbage"), 0);
        assert_eq!(parse_duration_secs(""), 0);
    }

    #[test]
    fn snapshot_guards_free_greater_than_total() {
        let raw = resource("1000", "2000");
        let snap = normalize_snapshot(&raw, &RawIdentity::default(), None);
        assert_eq!(snap.memory_used, 0);
        assert_eq!(snap.memory_usage, 0.0);
    }

    #[test]
    fn snapshot_defaults_missing_fields() {
        let snap = normalize_snapshot(&RawResource::default(), &RawIdentity::default(), None);
        assert!(snap.online);
        assert_eq!(snap.identity, "Unknown");
        assert_eq!(snap.model, "Unknown");
        assert_eq!(snap.cpu_load, 0.0);
        assert_eq!(snap.memory_usage, 0.0);
        assert_eq!(snap.uptime, "0s");
        assert!(snap.temperature.is_none());
    }

    #[test]
    fn snapshot_reads_temperature_from_health() {
        let raw = resource("1000", "500");
        let health = RawHealth {
            temperature: Some("38".to_string()),
            voltage: None,
        };
        let snap = normalize_snapshot(&raw, &RawIdentity::default(), Some(&health));
        assert_eq!(snap.temperature, Some(38.0));
        assert_eq!(snap.memory_usage, 50.0);
        assert_eq!(snap.uptime, "1d 1h 1m 1s");
    }

    #[test]
    fn interfaces_filtered_by_allow_list() {
        let interfaces = vec![
            RawInterface {
                name: Some("ether1".to_string()),
                interface_type: Some("ether".to_string()),
                disabled: Some("false".to_string()),
                running: Some("true".to_string()),
                tx_byte: Some("100".to_string()),
                rx_byte: Some("200".to_string()),
                ..Default::default()
            },
            RawInterface {
                name: Some("lo0".to_string()),
                interface_type: Some("loopback".to_string()),
                ..Default::default()
            },
        ];

        let report = normalize_interfaces(&interfaces, DEFAULT_INTERFACE_TYPES);
        assert_eq!(report.interfaces.len(), 1);
        assert_eq!(report.interfaces[0].name, "ether1");
        assert!(report.interfaces[0].enabled);
        assert!(report.interfaces[0].running);

        let totals = report.totals.expect("totals for non-empty report");
        assert_eq!(totals.count, 1);
        assert_eq!(totals.running, 1);
        assert_eq!(totals.tx_bytes, 100);
        assert_eq!(totals.rx_bytes, 200);
    }

    #[test]
    fn bad_counter_falls_back_to_zero_without_failing() {
        let interfaces = vec![RawInterface {
            name: Some("ether1".to_string()),
            interface_type: Some("ether".to_string()),
            tx_byte: Some("not-a-number".to_string()),
            rx_byte: Some("42".to_string()),
            ..Default::default()
        }];

        let report = normalize_interfaces(&interfaces, DEFAULT_INTERFACE_TYPES);
        assert_eq!(report.interfaces[0].tx_byte, 0);
        assert_eq!(report.interfaces[0].rx_byte, 42);
    }

    #[test]
    fn empty_interface_set_has_no_totals() {
        let report = normalize_interfaces(&[], DEFAULT_INTERFACE_TYPES);
        assert!(report.interfaces.is_empty());
        assert!(report.totals.is_none());
    }
}
