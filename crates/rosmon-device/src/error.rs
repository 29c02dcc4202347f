use std::time::Duration;

/// Errors that can occur when talking to a device.
///
/// Connection-level failures are distinguished internally for logging but
/// collapse to a single "offline" outcome for callers via [`is_offline`].
/// Variant messages never carry credential material.
///
/// [`is_offline`]: DeviceError::is_offline
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Host unreachable, connection refused, or connection closed mid-call.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The device rejected the credentials.
    #[error("authentication rejected by device")]
    AuthFailed,

    /// The call did not complete within its timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The addressed subsystem does not exist on this device model.
    /// Per-subsystem fetches map this to an empty result.
    #[error("subsystem not available: {0}")]
    Unsupported(String),

    /// The device API returned a non-success status.
    #[error("device API error: status={status}")]
    Api { status: u16 },

    /// The response payload could not be decoded.
    #[error("failed to decode device response: {0}")]
    Decode(String),
}

impl DeviceError {
    /// True for failures that make the device "offline" from the caller's
    /// point of view (unreachable, bad credentials, timed out).
    pub fn is_offline(&self) -> bool {
        matches!(
            self,
            DeviceError::ConnectionFailed(_) | DeviceError::AuthFailed | DeviceError::Timeout(_)
        )
    }
}

impl From<reqwest::Error> for DeviceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not expose the configured timeout on the error
            DeviceError::Timeout(Duration::ZERO)
        } else if err.is_connect() {
            DeviceError::ConnectionFailed(err.without_url().to_string())
        } else if err.is_decode() {
            DeviceError::Decode(err.without_url().to_string())
        } else {
            DeviceError::ConnectionFailed(err.without_url().to_string())
        }
    }
}

/// Convenience type alias so callers can write `error::Result<T>`.
pub type Result<T> = std::result::Result<T, DeviceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failures_collapse_to_offline() {
        assert!(DeviceError::ConnectionFailed("refused".into()).is_offline());
        assert!(DeviceError::AuthFailed.is_offline());
        assert!(DeviceError::Timeout(Duration::from_secs(10)).is_offline());
        assert!(!DeviceError::Unsupported("caps-man".into()).is_offline());
        assert!(!DeviceError::Api { status: 500 }.is_offline());
    }
}
