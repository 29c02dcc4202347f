use crate::NotificationChannel;
use rosmon_common::types::AlertEvent;
use tracing;

/// Per-rule notification routing, read from the rule row.
#[derive(Debug, Clone, Default)]
pub struct NotifyRouting {
    pub email: bool,
    pub telegram: bool,
    /// Recipients for the email channel.
    pub email_recipients: Vec<String>,
    /// Optional message template; empty uses the engine's message.
    pub message_template: String,
}

pub struct NotificationManager {
    email: Option<Box<dyn NotificationChannel>>,
    telegram: Option<Box<dyn NotificationChannel>>,
}

impl NotificationManager {
    pub fn new(
        email: Option<Box<dyn NotificationChannel>>,
        telegram: Option<Box<dyn NotificationChannel>>,
    ) -> Self {
        Self { email, telegram }
    }

    /// A manager with no configured channels; notify becomes a no-op.
    pub fn disabled() -> Self {
        Self {
            email: None,
            telegram: None,
        }
    }

    /// Dispatches one fired alert to the channels its rule enables.
    /// Delivery failures are logged and swallowed — a broken SMTP relay or
    /// Bot API outage must never fail alert evaluation.
    pub async fn notify(&self, event: &AlertEvent, routing: &NotifyRouting) {
        let message = render_message(event, &routing.message_template);

        if routing.email {
            match &self.email {
                Some(channel) => {
                    if let Err(e) = channel
                        .send(event, &message, &routing.email_recipients)
                        .await
                    {
                        tracing::error!(
                            channel = channel.channel_name(),
                            rule_id = %event.rule_id,
                            error = %e,
                            "Failed to send notification"
                        );
                    }
                }
                None => tracing::warn!(
                    rule_id = %event.rule_id,
                    "Rule requests email notification but no email channel is configured"
                ),
            }
        }

        if routing.telegram {
            match &self.telegram {
                Some(channel) => {
                    if let Err(e) = channel.send(event, &message, &[]).await {
                        tracing::error!(
                            channel = channel.channel_name(),
                            rule_id = %event.rule_id,
                            error = %e,
                            "Failed to send notification"
                        );
                    }
                }
                None => tracing::warn!(
                    rule_id = %event.rule_id,
                    "Rule requests telegram notification but no telegram channel is configured"
                ),
            }
        }
    }
}

/// Renders the outgoing message. An empty template falls back to the
/// engine-built message.
pub fn render_message(event: &AlertEvent, template: &str) -> String {
    if template.is_empty() {
        return event.message.clone();
    }
    template
        .replace("{{device_id}}", &event.device_id)
        .replace(
            "{{metric}}",
            &format!("{}/{}", event.metric_type, event.metric_name),
        )
        .replace("{{value}}", &format!("{:.2}", event.value))
        .replace("{{threshold}}", &format!("{:.2}", event.threshold))
        .replace("{{operator}}", &event.operator)
        .replace("{{severity}}", &event.severity.to_string())
        .replace("{{rule_name}}", &event.rule_name)
        .replace("{{timestamp}}", &event.fired_at.to_rfc3339())
}
