//! Telegram Bot API client.
//!
//! Two traits split the bot into the halves the relay uses independently:
//!
//! - [`ChatTransport`]: outbound messages to the configured chat
//!   (notifications and command replies).
//! - [`UpdateSource`]: inbound updates via `getUpdates` long polling.
//!
//! [`TelegramClient`] implements both over `reqwest`. All text is sent with
//! `parse_mode = HTML`; callers are responsible for escaping.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;

use frigate_relay_core::compose::ComposedMessage;
use frigate_relay_core::models::{MediaPayload, MediaResult};

use crate::config::Config;

/// Outbound half of the chat bot.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a notification: one message, at most one attachment.
    async fn send(&self, message: &ComposedMessage) -> Result<()>;

    async fn send_text(&self, text: &str) -> Result<()>;

    async fn send_photo(&self, photo: &MediaPayload, caption: &str) -> Result<()>;

    async fn send_video(&self, video: &MediaPayload, caption: &str) -> Result<()>;
}

/// A text message received by the bot.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub chat_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub update_id: i64,
    /// `None` for update kinds the relay ignores.
    pub message: Option<IncomingMessage>,
}

/// Inbound half of the chat bot.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Long-poll for updates with `update_id >= offset`. Passing an offset
    /// confirms every earlier update.
    async fn get_updates(&self, offset: Option<i64>, timeout: Duration) -> Result<Vec<Update>>;
}

pub struct TelegramClient {
    client: reqwest::Client,
    /// `<api_url>/bot<token>`
    endpoint: String,
    chat_id: String,
    upload_timeout: Duration,
    request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct RawUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    chat: RawChat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChat {
    id: i64,
}

impl TelegramClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.telegram.connect_timeout_secs))
            .build()
            .context("Failed to build Telegram HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/bot{}",
                config.telegram.api_url.trim_end_matches('/'),
                config.telegram.bot_token
            ),
            chat_id: config.telegram.chat_id.clone(),
            upload_timeout: config.upload_timeout(),
            request_timeout: Duration::from_secs(config.telegram.connect_timeout_secs),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.endpoint, method)
    }

    async fn call_json<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<T> {
        let resp = self
            .client
            .post(self.url(method))
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Telegram {} request failed", method))?;
        decode(method, resp).await
    }

    async fn send_media(
        &self,
        method: &str,
        field: &'static str,
        payload: &MediaPayload,
        caption: &str,
        streaming: bool,
    ) -> Result<()> {
        let part = Part::bytes(payload.bytes.clone())
            .file_name(payload.filename.clone())
            .mime_str(&payload.content_type)?;

        let mut form = Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", caption.to_string())
            .text("parse_mode", "HTML")
            .part(field, part);
        if streaming {
            form = form.text("supports_streaming", "true");
        }

        let resp = self
            .client
            .post(self.url(method))
            .timeout(self.upload_timeout)
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("Telegram {} upload failed", method))?;

        decode::<serde_json::Value>(method, resp).await?;
        Ok(())
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    method: &str,
    resp: reqwest::Response,
) -> Result<T> {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();

    let parsed: ApiResponse<T> = match serde_json::from_str(&text) {
        Ok(parsed) => parsed,
        Err(_) => bail!("Telegram {} error {}: {}", method, status, text),
    };

    if !parsed.ok {
        bail!(
            "Telegram {} error {}: {}",
            method,
            status,
            parsed.description.unwrap_or_default()
        );
    }
    parsed
        .result
        .ok_or_else(|| anyhow!("Telegram {} returned no result", method))
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send(&self, message: &ComposedMessage) -> Result<()> {
        match &message.media {
            MediaResult::Video(p) => {
                self.send_media("sendVideo", "video", p, &message.text, true)
                    .await
            }
            MediaResult::Animation(p) => {
                self.send_media("sendAnimation", "animation", p, &message.text, false)
                    .await
            }
            MediaResult::Snapshot(p) | MediaResult::Thumbnail(p) => {
                self.send_media("sendPhoto", "photo", p, &message.text, false)
                    .await
            }
            MediaResult::None => self.send_text(&message.text).await,
        }
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        self.call_json::<serde_json::Value>("sendMessage", &body, self.upload_timeout)
            .await?;
        Ok(())
    }

    async fn send_photo(&self, photo: &MediaPayload, caption: &str) -> Result<()> {
        self.send_media("sendPhoto", "photo", photo, caption, false)
            .await
    }

    async fn send_video(&self, video: &MediaPayload, caption: &str) -> Result<()> {
        self.send_media("sendVideo", "video", video, caption, true)
            .await
    }
}

#[async_trait]
impl UpdateSource for TelegramClient {
    async fn get_updates(&self, offset: Option<i64>, timeout: Duration) -> Result<Vec<Update>> {
        let mut body = serde_json::json!({
            "timeout": timeout.as_secs(),
            "allowed_updates": ["message"],
        });
        if let Some(offset) = offset {
            body["offset"] = serde_json::json!(offset);
        }

        let raw: Vec<RawUpdate> = self
            .call_json("getUpdates", &body, timeout + self.request_timeout)
            .await?;

        Ok(raw
            .into_iter()
            .map(|u| Update {
                update_id: u.update_id,
                message: u.message.and_then(|m| {
                    m.text.map(|text| IncomingMessage {
                        chat_id: m.chat.id.to_string(),
                        text,
                    })
                }),
            })
            .collect())
    }
}
