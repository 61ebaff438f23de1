//! Outbound notifications via the Telegram Bot API.
//!
//! Delivery is best effort: failures are logged and reported as `false`, never
//! surfaced to the caller.

use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::TelegramConfig;

const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    telegram: Option<TelegramConfig>,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct TelegramReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl Notifier {
    pub fn new(telegram: Option<TelegramConfig>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            telegram,
            api_base: TELEGRAM_API.to_string(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.telegram.is_some()
    }

    /// Send an HTML-formatted message. Returns whether Telegram accepted it.
    pub async fn send(&self, message: &str) -> bool {
        let Some(telegram) = &self.telegram else {
            debug!("Telegram credentials missing - notification skipped");
            return false;
        };

        let url = format!("{}/bot{}/sendMessage", self.api_base, telegram.bot_token);
        let payload = serde_json::json!({
            "chat_id": telegram.chat_id,
            "text": message,
            "parse_mode": "HTML"
        });

        let response = match self.client.post(&url).json(&payload).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "⚠️ Telegram request failed");
                return false;
            }
        };

        match response.json::<TelegramReply>().await {
            Ok(reply) if reply.ok => true,
            Ok(reply) => {
                warn!(description = ?reply.description, "⚠️ Telegram rejected message");
                false
            }
            Err(e) => {
                warn!(error = %e, "⚠️ Unreadable Telegram reply");
                false
            }
        }
    }
}

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
