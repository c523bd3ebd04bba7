//! Operator alerts over Telegram and Discord webhooks.

use async_trait::async_trait;
use pipeline_core::config::AlertsConfig;
use pipeline_core::providers::Notifier;
use pipeline_core::types::{Notification, NotificationKind};
use pipeline_core::{Error, Result};
use tracing::{debug, warn};

/// Delivers notifications to every configured alert channel.
pub struct WebhookNotifier {
    alerts_config: AlertsConfig,
    http_client: reqwest::Client,
    telegram_api: String,
}

impl WebhookNotifier {
    pub fn new(alerts_config: AlertsConfig) -> Self {
        Self {
            alerts_config,
            http_client: reqwest::Client::new(),
            telegram_api: "https://api.telegram.org".to_string(),
        }
    }

    fn format(notification: &Notification) -> String {
        let title = match notification.kind {
            NotificationKind::StopAdvanced => "Trailing stop advanced",
            NotificationKind::RegimeChanged => "Take-profit regime changed",
        };
        format!("<b>{}</b>\n{}", title, notification.message)
    }

    async fn send_telegram(&self, token: &str, chat_id: &str, message: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.telegram_api, token);

        self.http_client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": message,
                "parse_mode": "HTML"
            }))
            .send()
            .await?
            .error_for_status()?;

        debug!("Sent Telegram alert");
        Ok(())
    }

    async fn send_discord(&self, webhook_url: &str, message: &str) -> Result<()> {
        self.http_client
            .post(webhook_url)
            .json(&serde_json::json!({
                "content": message
            }))
            .send()
            .await?
            .error_for_status()?;

        debug!("Sent Discord alert");
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    /// Tries every channel; fails only if every configured channel failed.
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let message = Self::format(notification);
        let mut attempted = 0;
        let mut failed = 0;

        if let (Some(token), Some(chat_id)) = (
            &self.alerts_config.telegram_bot_token,
            &self.alerts_config.telegram_chat_id,
        ) {
            attempted += 1;
            if let Err(e) = self.send_telegram(token, chat_id, &message).await {
                warn!(position_id = %notification.position_id, error = %e, "Failed to send Telegram alert");
                failed += 1;
            }
        }

        if let Some(webhook_url) = &self.alerts_config.discord_webhook_url {
            attempted += 1;
            if let Err(e) = self.send_discord(webhook_url, &message).await {
                warn!(position_id = %notification.position_id, error = %e, "Failed to send Discord alert");
                failed += 1;
            }
        }

        if attempted > 0 && failed == attempted {
            return Err(Error::provider("alerts", "all alert channels failed"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_format_uses_kind_title() {
        let n = Notification::new(
            NotificationKind::StopAdvanced,
            "BTCUSDT",
            Uuid::new_v4(),
            "BTCUSDT LONG crossed TP2 at 103: stop 97 -> 99.91",
        );
        let text = WebhookNotifier::format(&n);
        assert!(text.starts_with("<b>Trailing stop advanced</b>"));
        assert!(text.ends_with("stop 97 -> 99.91"));
    }

    #[tokio::test]
    async fn test_unconfigured_notifier_is_a_no_op() {
        let notifier = WebhookNotifier::new(AlertsConfig::default());
        let n = Notification::new(NotificationKind::RegimeChanged, "ETHUSDT", Uuid::new_v4(), "BEAR");
        assert!(notifier.notify(&n).await.is_ok());
    }
}
