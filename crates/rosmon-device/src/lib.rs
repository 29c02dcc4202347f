//! Device access layer for RouterOS devices.
//!
//! [`DeviceClient`] abstracts one connection to a managed device; the
//! concrete [`rest::RestDeviceClient`] speaks the RouterOS v7 REST surface.
//! Raw responses are typed records with per-field defaults so that key
//! absence on a given device model never fails a poll. [`normalize`] shapes
//! raw responses into the fixed metrics schema, and [`backup`] drives the
//! backup/restore sequences with bounded retries.

pub mod backup;
pub mod command;
pub mod error;
pub mod normalize;
pub mod rest;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

pub use error::DeviceError;

/// Connection parameters for one device endpoint.
///
/// The secret is held for the duration of a single connection attempt and
/// is redacted from the `Debug` representation.
#[derive(Clone)]
pub struct DeviceEndpoint {
    pub address: String,
    pub username: String,
    pub secret: String,
    pub port: u16,
    pub use_tls: bool,
    pub timeout: Duration,
}

impl std::fmt::Debug for DeviceEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceEndpoint")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("secret", &"***")
            .field("port", &self.port)
            .field("use_tls", &self.use_tls)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// RouterOS returns kebab-case keys and encodes numbers and booleans as
/// strings on some firmware versions and as native JSON values on others.
/// This deserializer accepts all three encodings and yields the string
/// form; coercion to typed values happens in [`normalize`].
fn de_flex<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flex {
        Str(String),
        Num(serde_json::Number),
        Bool(bool),
    }

    Ok(Option::<Flex>::deserialize(deserializer)?.map(|f| match f {
        Flex::Str(s) => s,
        Flex::Num(n) => n.to_string(),
        Flex::Bool(b) => b.to_string(),
    }))
}

/// `/system/resource` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawResource {
    #[serde(default, deserialize_with = "de_flex")]
    pub uptime: Option<String>,
    #[serde(default, deserialize_with = "de_flex")]
    pub version: Option<String>,
    #[serde(default, rename = "board-name", deserialize_with = "de_flex")]
    pub board_name: Option<String>,
    #[serde(default, rename = "architecture-name", deserialize_with = "de_flex")]
    pub architecture_name: Option<String>,
    #[serde(default, rename = "cpu-count", deserialize_with = "de_flex")]
    pub cpu_count: Option<String>,
    #[serde(default, rename = "cpu-load", deserialize_with = "de_flex")]
    pub cpu_load: Option<String>,
    #[serde(default, rename = "cpu-frequency", deserialize_with = "de_flex")]
    pub cpu_frequency: Option<String>,
    #[serde(default, rename = "total-memory", deserialize_with = "de_flex")]
    pub total_memory: Option<String>,
    #[serde(default, rename = "free-memory", deserialize_with = "de_flex")]
    pub free_memory: Option<String>,
    #[serde(default, rename = "total-hdd-space", deserialize_with = "de_flex")]
    pub total_hdd_space: Option<String>,
    #[serde(default, rename = "free-hdd-space", deserialize_with = "de_flex")]
    pub free_hdd_space: Option<String>,
}

/// `/system/identity` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawIdentity {
    #[serde(default, deserialize_with = "de_flex")]
    pub name: Option<String>,
}

/// `/system/health` response, already reduced to the fields rosmon reads.
/// RouterOS v6 returns a flat object, v7 a list of name/value entries; the
/// client maps both into this record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawHealth {
    #[serde(default, deserialize_with = "de_flex")]
    pub temperature: Option<String>,
    #[serde(default, deserialize_with = "de_flex")]
    pub voltage: Option<String>,
}

/// `/interface` list entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawInterface {
    #[serde(default, deserialize_with = "de_flex")]
    pub name: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "de_flex")]
    pub interface_type: Option<String>,
    #[serde(default, rename = "mac-address", deserialize_with = "de_flex")]
    pub mac_address: Option<String>,
    #[serde(default, deserialize_with = "de_flex")]
    pub disabled: Option<String>,
    #[serde(default, deserialize_with = "de_flex")]
    pub running: Option<String>,
    #[serde(default, rename = "tx-byte", deserialize_with = "de_flex")]
    pub tx_byte: Option<String>,
    #[serde(default, rename = "rx-byte", deserialize_with = "de_flex")]
    pub rx_byte: Option<String>,
    #[serde(default, rename = "tx-packet", deserialize_with = "de_flex")]
    pub tx_packet: Option<String>,
    #[serde(default, rename = "rx-packet", deserialize_with = "de_flex")]
    pub rx_packet: Option<String>,
    #[serde(default, rename = "tx-drop", deserialize_with = "de_flex")]
    pub tx_drop: Option<String>,
    #[serde(default, rename = "rx-drop", deserialize_with = "de_flex")]
    pub rx_drop: Option<String>,
    #[serde(default, rename = "tx-error", deserialize_with = "de_flex")]
    pub tx_error: Option<String>,
    #[serde(default, rename = "rx-error", deserialize_with = "de_flex")]
    pub rx_error: Option<String>,
}

/// `/interface/wireless/registration-table` and
/// `/caps-man/registration-table` list entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRegistration {
    #[serde(default, rename = "mac-address", deserialize_with = "de_flex")]
    pub mac_address: Option<String>,
    #[serde(default, deserialize_with = "de_flex")]
    pub interface: Option<String>,
    #[serde(default, rename = "signal-strength", deserialize_with = "de_flex")]
    pub signal_strength: Option<String>,
    #[serde(default, rename = "tx-rate", deserialize_with = "de_flex")]
    pub tx_rate: Option<String>,
    #[serde(default, rename = "rx-rate", deserialize_with = "de_flex")]
    pub rx_rate: Option<String>,
    #[serde(default, deserialize_with = "de_flex")]
    pub uptime: Option<String>,
}

/// `/ip/dhcp-server/lease` list entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDhcpLease {
    #[serde(default, rename = "mac-address", deserialize_with = "de_flex")]
    pub mac_address: Option<String>,
    #[serde(default, deserialize_with = "de_flex")]
    pub address: Option<String>,
    #[serde(default, rename = "host-name", deserialize_with = "de_flex")]
    pub host_name: Option<String>,
    #[serde(default, rename = "client-id", deserialize_with = "de_flex")]
    pub client_id: Option<String>,
    #[serde(default, deserialize_with = "de_flex")]
    pub status: Option<String>,
}

/// `/file` list entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawFile {
    #[serde(default, deserialize_with = "de_flex")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "de_flex")]
    pub size: Option<String>,
    #[serde(default, rename = "creation-time", deserialize_with = "de_flex")]
    pub creation_time: Option<String>,
}

/// One live connection to a managed device.
///
/// Clients are stateless per poll: a connection is opened for one poll (or
/// one backup/restore step) and dropped afterwards, never reused.
/// Per-subsystem fetches degrade gracefully — a device model without
/// wireless, CAPsMAN, or health support yields empty/absent results rather
/// than an error.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Fetches `/system/resource`.
    async fn fetch_resource(&self) -> Result<RawResource, DeviceError>;

    /// Fetches `/system/identity`.
    async fn fetch_identity(&self) -> Result<RawIdentity, DeviceError>;

    /// Fetches `/system/health`; `None` when the device has no health
    /// sensors.
    async fn fetch_health(&self) -> Result<Option<RawHealth>, DeviceError>;

    /// Fetches interfaces, optionally restricted to one interface name.
    async fn fetch_interfaces(
        &self,
        filter_name: Option<&str>,
    ) -> Result<Vec<RawInterface>, DeviceError>;

    /// Fetches the wireless registration table; empty when unsupported.
    async fn fetch_wireless_clients(&self) -> Result<Vec<RawRegistration>, DeviceError>;

    /// Fetches DHCP server leases; empty when unsupported.
    async fn fetch_dhcp_leases(&self) -> Result<Vec<RawDhcpLease>, DeviceError>;

    /// Fetches the CAPsMAN registration table; empty when unsupported.
    async fn fetch_capsman_clients(&self) -> Result<Vec<RawRegistration>, DeviceError>;

    /// Lists files on the device (used to locate backup artifacts).
    async fn list_files(&self) -> Result<Vec<RawFile>, DeviceError>;

    /// Runs a validated read-only query against an arbitrary resource
    /// path and returns the raw JSON. Command validation happens in
    /// [`command`], before this is ever called.
    async fn run_query(&self, path: &str) -> Result<serde_json::Value, DeviceError>;

    /// Issues an on-device backup creation with the given artifact name.
    async fn create_backup(&self, name: &str) -> Result<(), DeviceError>;

    /// Issues a restore from the named on-device artifact. The device is
    /// expected to reboot afterwards.
    async fn restore_backup(&self, name: &str) -> Result<(), DeviceError>;
}

/// Opens connections to device endpoints.
///
/// A successful `connect` doubles as the live connection test required
/// when registering a device.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &DeviceEndpoint,
    ) -> Result<Box<dyn DeviceClient>, DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_resource_accepts_string_and_numeric_fields() {
        let raw: RawResource = serde_json::from_value(serde_json::json!({
            "uptime": "1d2h3m4s",
            "total-memory": "1073741824",
            "free-memory": 536870912u64,
            "cpu-load": 12,
            "board-name": "RB4011iGS+",
        }))
        .expect("resource should parse");

        assert_eq!(raw.total_memory.as_deref(), Some("1073741824"));
        assert_eq!(raw.free_memory.as_deref(), Some("536870912"));
        assert_eq!(raw.cpu_load.as_deref(), Some("12"));
        assert!(raw.version.is_none());
    }

    #[test]
    fn raw_interface_accepts_native_booleans() {
        let raw: RawInterface = serde_json::from_value(serde_json::json!({
            "name": "ether1",
            "type": "ether",
            "disabled": false,
            "running": "true",
        }))
        .expect("interface should parse");

        assert_eq!(raw.disabled.as_deref(), Some("false"));
        assert_eq!(raw.running.as_deref(), Some("true"));
    }

    #[test]
    fn endpoint_debug_redacts_secret() {
        let endpoint = DeviceEndpoint {
            address: "192.0.2.1".to_string(),
            username: "admin".to_string(),
            secret: "hunter2".to_string(),
            port: 443,
            use_tls: true,
            timeout: Duration::from_secs(10),
        };
        let debug = format!("{endpoint:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("***"));
    }
}
