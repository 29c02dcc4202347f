use crate::NotificationChannel;
use anyhow::Result;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use rosmon_common::types::AlertEvent;
use tracing;

pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl EmailChannel {
    pub fn new(
        smtp_host: &str,
        smtp_port: u16,
        username: Option<&str>,
        password: Option<&str>,
        from: &str,
    ) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?.port(smtp_port);

        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
        }

        let transport = builder.build();
        Ok(Self {
            transport,
            from: from.to_string(),
        })
    }

    fn format_body(alert: &AlertEvent, message: &str) -> String {
        format!(
            "Alert: {severity}\nRule: {rule}\nDevice: {device}\nMetric: {metric_type}/{metric_name}\nValue: {value:.2}\nThreshold: {operator} {threshold:.2}\nMessage: {message}\nTime: {time}",
            severity = alert.severity,
            rule = alert.rule_name,
            device = alert.device_id,
            metric_type = alert.metric_type,
            metric_name = alert.metric_name,
            value = alert.value,
            operator = alert.operator,
            threshold = alert.threshold,
            message = message,
            time = alert.fired_at,
        )
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    async fn send(&self, alert: &AlertEvent, message: &str, recipients: &[String]) -> Result<()> {
        if recipients.is_empty() {
            tracing::warn!(rule_id = %alert.rule_id, "Email notification with no recipients");
            return Ok(());
        }

        let subject = format!(
            "[rosmon][{}] {} - {}",
            alert.severity, alert.rule_name, alert.device_id
        );
        let body = Self::format_body(alert, message);

        let mut failed = 0usize;
        for recipient in recipients {
            let email = Message::builder()
                .from(self.from.parse()?)
                .to(recipient.parse()?)
                .subject(&subject)
                .header(ContentType::TEXT_PLAIN)
                .body(body.clone())?;

            let mut recipient_err = None;
            for attempt in 0..3u32 {
                match self.transport.send(email.clone()).await {
                    Ok(_) => {
                        recipient_err = None;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            attempt = attempt + 1,
                            recipient = %recipient,
                            error = %e,
                            "Email send failed, retrying"
                        );
                        recipient_err = Some(e);
                        if attempt < 2 {
                            tokio::time::sleep(std::time::Duration::from_millis(
                                100 * 2u64.pow(attempt),
                            ))
                            .await;
                        }
                    }
                }
            }
            if let Some(e) = recipient_err {
                tracing::error!(recipient = %recipient, error = %e, "Email send failed after 3 attempts");
                failed += 1;
            }
        }

        if failed > 0 {
            anyhow::bail!("email delivery failed for {failed} of {} recipients", recipients.len());
        }
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "email"
    }
}
