//! Notification delivery for fired alerts.
//!
//! Channels (email via SMTP, Telegram via the Bot API) implement
//! [`NotificationChannel`]; the [`manager::NotificationManager`] routes an
//! alert to the channels its rule enables and treats delivery failure as
//! non-fatal — it is logged and never propagates into the alert pipeline.

pub mod channels;
pub mod manager;

use anyhow::Result;
use async_trait::async_trait;
use rosmon_common::types::AlertEvent;

/// A notification delivery channel that sends alert events to an external
/// service.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Delivers the rendered alert message through this channel.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails after retries.
    async fn send(&self, alert: &AlertEvent, message: &str, recipients: &[String]) -> Result<()>;

    /// Returns the channel type name (e.g., `"email"`, `"telegram"`).
    fn channel_name(&self) -> &str;
}
