//! Telegram channel: Bot API account calls, getUpdates long-poll, and the transport sends.

use crate::channels::inbound::InboundEvent;
use crate::channels::keyboard::ReplyKeyboard;
use crate::channels::transport::{DeliveryHandle, FilePayload, MediaKind, Transport};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_TIMEOUT: u64 = 30;
/// Margin over the server-side long-poll wait before a stalled getUpdates is abandoned.
const POLL_GRACE_SECS: u64 = 10;
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Bot API envelope: `{ "ok": bool, "result": T, "description": "..." }`.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram update payload (getUpdates result item or webhook POST body).
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

/// Subset of getWebhookInfo used for startup diagnostics.
#[derive(Debug, Deserialize)]
pub struct WebhookInfo {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub pending_update_count: i64,
    #[serde(default)]
    pub last_error_date: Option<i64>,
    #[serde(default)]
    pub last_error_message: Option<String>,
}

impl TelegramUpdate {
    /// Convert to an inbound event. Replies go to the chat, so the chat id is the sender id.
    pub fn into_inbound(self) -> Option<InboundEvent> {
        let msg = self.message?;
        let sender_name = msg
            .from
            .and_then(|u| u.username.or(u.first_name))
            .unwrap_or_default();
        Some(InboundEvent {
            sender_id: msg.chat.id,
            sender_name,
            text: msg.text.unwrap_or_default(),
        })
    }
}

/// Telegram channel connector: account lifecycle, long-poll inbound loop, and sends.
pub struct TelegramChannel {
    token: String,
    api_base: String,
    running: AtomicBool,
    poll_timeout: Duration,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_api_base(token, telegram_api_base())
    }

    pub fn with_api_base(token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            running: AtomicBool::new(false),
            poll_timeout: Duration::from_secs(LONG_POLL_TIMEOUT + POLL_GRACE_SECS),
            client: build_client(),
        }
    }

    #[cfg(test)]
    fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the long-poll loop after its current request.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Start the getUpdates long-poll loop and forward events to the dispatcher. Returns a handle to await on shutdown.
    pub fn start_inbound(self: Arc<Self>, inbound_tx: mpsc::Sender<InboundEvent>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("telegram channel: starting getUpdates long-poll loop");
        tokio::spawn(async move {
            run_get_updates_loop(self, inbound_tx).await;
        })
    }

    /// getMe: returns the bot username (used to confirm the token at startup).
    pub async fn get_me(&self) -> Result<String, String> {
        let res = self
            .client
            .get(self.method_url("getMe"))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let me: TelegramUser = read_result("getMe", res).await?;
        Ok(me.username.unwrap_or_else(|| me.id.to_string()))
    }

    /// Call Telegram getUpdates (long poll). Returns (updates, next_offset).
    async fn get_updates(&self, offset: Option<i64>) -> Result<(Vec<TelegramUpdate>, Option<i64>), String> {
        let mut url = format!("{}?timeout={}", self.method_url("getUpdates"), LONG_POLL_TIMEOUT);
        if let Some(off) = offset {
            url = format!("{}&offset={}", url, off);
        }
        let res = self
            .client
            .get(&url)
            .timeout(self.poll_timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let updates: Vec<TelegramUpdate> = read_result("getUpdates", res).await?;
        let next_offset = updates.iter().map(|u| u.update_id).max().map(|id| id + 1);
        Ok((updates, next_offset))
    }

    /// Set webhook URL, uploading the self-signed certificate when given. Telegram then POSTs updates to the URL.
    pub async fn set_webhook(
        &self,
        url: &str,
        certificate: Option<&Path>,
        secret: Option<&str>,
    ) -> Result<(), String> {
        let mut form = Form::new().text("url", url.to_string());
        if let Some(s) = secret {
            form = form.text("secret_token", s.to_string());
        }
        if let Some(path) = certificate {
            let pem = tokio::fs::read(path)
                .await
                .map_err(|e| format!("reading certificate {}: {}", path.display(), e))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "cert.pem".to_string());
            form = form.part("certificate", Part::bytes(pem).file_name(name));
        }
        let res = self
            .client
            .post(self.method_url("setWebhook"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let _: bool = read_result("setWebhook", res).await?;
        Ok(())
    }

    /// getWebhookInfo: pending count and the last delivery error Telegram saw.
    pub async fn webhook_info(&self) -> Result<WebhookInfo, String> {
        let res = self
            .client
            .get(self.method_url("getWebhookInfo"))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        read_result("getWebhookInfo", res).await
    }

    /// Remove webhook so the bot can use getUpdates again.
    pub async fn delete_webhook(&self) -> Result<(), String> {
        let res = self
            .client
            .post(self.method_url("deleteWebhook"))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let _: bool = read_result("deleteWebhook", res).await?;
        Ok(())
    }

    /// Send a text message to a chat via sendMessage API.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&ReplyKeyboard>,
    ) -> Result<DeliveryHandle, String> {
        let mut body = serde_json::json!({ "chat_id": chat_id, "text": text });
        if let Some(kb) = keyboard {
            body["reply_markup"] = kb.to_markup();
        }
        let res = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let sent: SentMessage = read_result("sendMessage", res).await?;
        Ok(sent.message_id)
    }

    /// Upload a file with sendPhoto, sendVideo or sendDocument.
    pub async fn send_file(
        &self,
        chat_id: i64,
        kind: MediaKind,
        file: &FilePayload,
    ) -> Result<DeliveryHandle, String> {
        let (method, field) = match kind {
            MediaKind::Image => ("sendPhoto", "photo"),
            MediaKind::Video => ("sendVideo", "video"),
            MediaKind::File => ("sendDocument", "document"),
        };
        let part = Part::stream_with_length(file.bytes.clone(), file.size() as u64)
            .file_name(file.name.clone());
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part(field, part);
        let res = self
            .client
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let sent: SentMessage = read_result(method, res).await?;
        Ok(sent.message_id)
    }
}

/// Decode a Bot API response, turning HTTP and `ok: false` failures into error strings.
async fn read_result<T: DeserializeOwned>(method: &str, res: reqwest::Response) -> Result<T, String> {
    let status = res.status();
    let body = res.text().await.map_err(|e| e.to_string())?;
    let data: ApiResponse<T> = serde_json::from_str(&body)
        .map_err(|_| format!("{} failed: {} {}", method, status, body))?;
    if !data.ok {
        return Err(format!(
            "{} failed: {} {}",
            method,
            status,
            data.description.unwrap_or_default()
        ));
    }
    data.result
        .ok_or_else(|| format!("{} returned no result", method))
}

async fn run_get_updates_loop(channel: Arc<TelegramChannel>, inbound_tx: mpsc::Sender<InboundEvent>) {
    let mut offset: Option<i64> = None;
    while channel.running() {
        match channel.get_updates(offset).await {
            Ok((updates, next)) => {
                if next.is_some() {
                    offset = next;
                }
                for u in updates {
                    if let Some(event) = u.into_inbound() {
                        if inbound_tx.send(event).await.is_err() {
                            log::debug!("telegram: inbound queue closed, stopping loop");
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                log::debug!("telegram getUpdates error: {}", e);
                tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
            }
        }
    }
    log::info!("telegram channel: getUpdates loop stopped");
}

#[async_trait]
impl Transport for TelegramChannel {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&ReplyKeyboard>,
    ) -> Result<DeliveryHandle, String> {
        self.send_message(chat_id, text, keyboard).await
    }

    async fn send_media(
        &self,
        chat_id: i64,
        kind: MediaKind,
        file: &FilePayload,
    ) -> Result<DeliveryHandle, String> {
        self.send_file(chat_id, kind, file).await
    }
}

/// Resolve Telegram bot API base URL (for tests or custom endpoints).
/// No overall timeout on the client: uploads may be large. Long polls carry their own.
fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|e| {
            log::warn!("telegram http client: {}, using defaults", e);
            reqwest::Client::new()
        })
}

pub fn telegram_api_base() -> String {
    std::env::var("TELEGRAM_API_BASE").unwrap_or_else(|_| TELEGRAM_API_BASE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_with_text_becomes_inbound_event() {
        let update: TelegramUpdate = serde_json::from_str(
            r#"{"update_id": 7, "message": {"chat": {"id": 42}, "from": {"id": 42, "username": "ann"}, "text": "/start"}}"#,
        )
        .unwrap();
        let event = update.into_inbound().unwrap();
        assert_eq!(event, InboundEvent::new(42, "ann", "/start"));
    }

    #[test]
    fn update_without_text_has_empty_text() {
        let update: TelegramUpdate = serde_json::from_str(
            r#"{"update_id": 8, "message": {"chat": {"id": 5}, "from": {"id": 5, "first_name": "Bo"}}}"#,
        )
        .unwrap();
        let event = update.into_inbound().unwrap();
        assert_eq!(event.sender_name, "Bo");
        assert!(event.text.is_empty());
    }

    #[test]
    fn update_without_message_is_skipped() {
        let update: TelegramUpdate = serde_json::from_str(r#"{"update_id": 9}"#).unwrap();
        assert!(update.into_inbound().is_none());
    }

    #[test]
    fn api_error_description_is_surfaced() {
        let data: ApiResponse<SentMessage> =
            serde_json::from_str(r#"{"ok": false, "description": "Bad Request: chat not found"}"#)
                .unwrap();
        assert!(!data.ok);
        assert!(data.result.is_none());
        assert_eq!(data.description.as_deref(), Some("Bad Request: chat not found"));
    }

    #[tokio::test]
    async fn stalled_get_updates_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept connections and never answer.
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        let channel = TelegramChannel::with_api_base("t", format!("http://{}", addr))
            .with_poll_timeout(Duration::from_millis(200));
        let result = tokio::time::timeout(Duration::from_secs(5), channel.get_updates(None))
            .await
            .expect("getUpdates was not bounded");
        assert!(result.is_err());
        server.abort();
    }
}
