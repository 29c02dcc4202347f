use crate::NotificationChannel;
use anyhow::Result;
use async_trait::async_trait;
use rosmon_common::types::AlertEvent;
use tracing;

/// Telegram Bot API channel. The chat to notify is part of the channel
/// configuration rather than per-rule recipients.
pub struct TelegramChannel {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramChannel {
    pub fn new(bot_token: &str, chat_id: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
        }
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    async fn send(&self, alert: &AlertEvent, message: &str, _recipients: &[String]) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let text = format!(
            "[{}] {}\n{}",
            alert.severity.to_string().to_uppercase(),
            alert.rule_name,
            message
        );
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
        });

        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 0..3u32 {
            match self.client.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    let status = resp.status();
                    tracing::warn!(
                        attempt = attempt + 1,
                        status = %status,
                        "Telegram API returned non-success status, retrying"
                    );
                    last_err = Some(anyhow::anyhow!("Telegram API error: status={status}"));
                }
                Err(e) => {
                    // without_url: the request URL embeds the bot token
                    let sanitized = e.without_url();
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %sanitized,
                        "Telegram send failed, retrying"
                    );
                    last_err = Some(anyhow::anyhow!("Telegram send failed: {sanitized}"));
                }
            }
            if attempt < 2 {
                tokio::time::sleep(std::time::Duration::from_millis(100 * 2u64.pow(attempt))).await;
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Telegram send failed")))
    }

    fn channel_name(&self) -> &str {
        "telegram"
    }
}
