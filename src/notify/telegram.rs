// src/notify/telegram.rs
use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::Notifier;

/// Telegram Bot API transport. Credentials come from the environment
/// (`TG_TOKEN`, `TG_CHAT_ID`); transient failures are retried with
/// exponential backoff before the error is surfaced to the caller.
#[derive(Clone)]
pub struct TelegramNotifier {
    token: Option<String>,
    chat_id: Option<String>,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl TelegramNotifier {
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("TG_TOKEN").ok(),
            std::env::var("TG_CHAT_ID").ok(),
        )
    }

    pub fn new(token: Option<String>, chat_id: Option<String>) -> Self {
        Self {
            token,
            chat_id,
            client: Client::new(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.token.is_some() && self.chat_id.is_some()
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        let (Some(token), Some(chat_id)) = (&self.token, &self.chat_id) else {
            return Err(anyhow!("TG_TOKEN / TG_CHAT_ID not set"));
        };

        let url = format!("https://api.telegram.org/bot{token}/sendMessage");
        let payload = SendMessage {
            chat_id,
            text,
            parse_mode: "Markdown",
        };

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&url)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1)))
                                .await;
                            continue;
                        }
                        return Err(anyhow!("Telegram HTTP error: {e}"));
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(anyhow!("Telegram request failed: {e}"));
                }
            }
        }
    }
}
