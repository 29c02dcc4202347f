use crate::error::{DeviceError, Result};
use crate::{
    DeviceClient, DeviceConnector, DeviceEndpoint, RawDhcpLease, RawFile, RawHealth, RawIdentity,
    RawInterface, RawRegistration, RawResource,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Opens [`RestDeviceClient`] connections over the RouterOS v7 REST API.
///
/// The binary RouterOS API wire protocol is deliberately not implemented;
/// all device communication goes through the HTTP surface.
pub struct RestConnector;

impl RestConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RestConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceConnector for RestConnector {
    async fn connect(&self, endpoint: &DeviceEndpoint) -> Result<Box<dyn DeviceClient>> {
        let client = RestDeviceClient::new(endpoint)?;
        // Probe the identity endpoint so connect doubles as a live test;
        // auth and reachability failures surface here, not mid-poll.
        client.fetch_identity().await?;
        Ok(Box::new(client))
    }
}

pub struct RestDeviceClient {
    client: Client,
    base_url: String,
    username: String,
    secret: String,
    timeout: Duration,
}

impl RestDeviceClient {
    pub fn new(endpoint: &DeviceEndpoint) -> Result<Self> {
        // Routers ship self-signed certificates; the use_tls flag selects
        // transport encryption, not chain validation.
        let client = Client::builder()
            .use_rustls_tls()
            .danger_accept_invalid_certs(true)
            .timeout(endpoint.timeout)
            .build()
            .map_err(|e| DeviceError::ConnectionFailed(e.without_url().to_string()))?;

        let scheme = if endpoint.use_tls { "https" } else { "http" };
        Ok(Self {
            client,
            base_url: format!("{}://{}:{}", scheme, endpoint.address, endpoint.port),
            username: endpoint.username.clone(),
            secret: endpoint.secret.clone(),
            timeout: endpoint.timeout,
        })
    }

    fn map_send_error(&self, err: reqwest::Error) -> DeviceError {
        if err.is_timeout() {
            DeviceError::Timeout(self.timeout)
        } else {
            err.into()
        }
    }

    fn check_status(&self, status: StatusCode, path: &str) -> Result<()> {
        match status {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(DeviceError::AuthFailed),
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => {
                Err(DeviceError::Unsupported(path.to_string()))
            }
            s => Err(DeviceError::Api { status: s.as_u16() }),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}/rest{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.secret))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        self.check_status(response.status(), path)?;
        response
            .json::<T>()
            .await
            .map_err(|e| DeviceError::Decode(e.without_url().to_string()))
    }

    async fn post_command(&self, path: &str, body: serde_json::Value) -> Result<()> {
        let url = format!("{}/rest{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        self.check_status(response.status(), path)
    }

    /// Runs a list fetch, mapping an unsupported subsystem to an empty
    /// result so one missing feature never fails the poll.
    async fn get_list_or_empty<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        match self.get_json::<Vec<T>>(path).await {
            Ok(items) => Ok(items),
            Err(DeviceError::Unsupported(subsystem)) => {
                tracing::debug!(subsystem = %subsystem, "Subsystem absent, returning empty list");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl DeviceClient for RestDeviceClient {
    async fn fetch_resource(&self) -> Result<RawResource> {
        self.get_json("/system/resource").await
    }

    async fn fetch_identity(&self) -> Result<RawIdentity> {
        self.get_json("/system/identity").await
    }

    async fn fetch_health(&self) -> Result<Option<RawHealth>> {
        // v6 returns a flat object, v7 a list of {name, value} entries.
        let value = match self.get_json::<serde_json::Value>("/system/health").await {
            Ok(v) => v,
            Err(DeviceError::Unsupported(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        match value {
            serde_json::Value::Object(_) => {
                let health: RawHealth = serde_json::from_value(value)
                    .map_err(|e| DeviceError::Decode(e.to_string()))?;
                Ok(Some(health))
            }
            serde_json::Value::Array(entries) => {
                let mut health = RawHealth::default();
                for entry in entries {
                    let name = entry.get("name").and_then(|v| v.as_str()).unwrap_or("");
                    let reading = entry
                        .get("value")
                        .map(|v| match v {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .unwrap_or_default();
                    match name {
                        "temperature" => health.temperature = Some(reading),
                        "voltage" => health.voltage = Some(reading),
                        _ => {}
                    }
                }
                if health.temperature.is_none() && health.voltage.is_none() {
                    Ok(None)
                } else {
                    Ok(Some(health))
                }
            }
            _ => Ok(None),
        }
    }

    async fn fetch_interfaces(&self, filter_name: Option<&str>) -> Result<Vec<RawInterface>> {
        let path = match filter_name {
            Some(name) => format!("/interface?name={name}"),
            None => "/interface".to_string(),
        };
        self.get_json(&path).await
    }

    async fn fetch_wireless_clients(&self) -> Result<Vec<RawRegistration>> {
        self.get_list_or_empty("/interface/wireless/registration-table")
            .await
    }

    async fn fetch_dhcp_leases(&self) -> Result<Vec<RawDhcpLease>> {
        self.get_list_or_empty("/ip/dhcp-server/lease").await
    }

    async fn fetch_capsman_clients(&self) -> Result<Vec<RawRegistration>> {
        self.get_list_or_empty("/caps-man/registration-table").await
    }

    async fn list_files(&self) -> Result<Vec<RawFile>> {
        self.get_json("/file").await
    }

    async fn run_query(&self, path: &str) -> Result<serde_json::Value> {
        self.get_json(path).await
    }

    async fn create_backup(&self, name: &str) -> Result<()> {
        self.post_command("/system/backup/save", serde_json::json!({ "name": name }))
            .await
    }

    async fn restore_backup(&self, name: &str) -> Result<()> {
        self.post_command(
            "/system/backup/load",
            serde_json::json!({ "name": name, "password": "" }),
        )
        .await
    }
}
