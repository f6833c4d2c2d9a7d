use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::{LaunchButton, MessageTransport, TransportError, Update};

const API_BASE: &str = "https://api.telegram.org";
/// Server-side long-poll timeout, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Bot API client. Not `Debug`: the base URL carries the bot token.
pub struct TelegramTransport {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramTransport {
    pub fn new(token: &str) -> Result<Self, TransportError> {
        Self::with_base_url(API_BASE, token)
    }

    pub fn with_base_url(api_base: &str, token: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 15))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: format!("{}/bot{token}", api_base.trim_end_matches('/')),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T, TransportError> {
        let response = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .json(body)
            .send()
            .await?;
        let envelope: ApiResponse<T> = response.json().await?;
        unwrap_envelope(method, envelope)
    }
}

fn unwrap_envelope<T>(method: &str, envelope: ApiResponse<T>) -> Result<T, TransportError> {
    match envelope {
        ApiResponse {
            ok: true,
            result: Some(result),
            ..
        } => Ok(result),
        ApiResponse {
            ok: true,
            result: None,
            ..
        } => Err(TransportError::Api(format!("{method}: response without result"))),
        ApiResponse { description, .. } => Err(TransportError::Api(format!(
            "{method}: {}",
            description.unwrap_or_else(|| "request rejected".to_string())
        ))),
    }
}

/// Decode a `getUpdates` batch one update at a time.
///
/// An update whose body does not decode is kept as an empty update with its
/// id, so the offset still moves past it. One without a readable id is dropped.
fn decode_updates(raw: Vec<Value>) -> Vec<Update> {
    raw.into_iter()
        .filter_map(|value| {
            let update_id = value.get("update_id").and_then(Value::as_i64);
            match serde_json::from_value::<Update>(value) {
                Ok(update) => Some(update),
                Err(err) => {
                    tracing::warn!(?update_id, error = %err, "skipping undecodable update");
                    update_id.map(|update_id| Update {
                        update_id,
                        message: None,
                    })
                }
            }
        })
        .collect()
}

fn poll_body(offset: Option<i64>) -> Value {
    let mut body = json!({
        "timeout": POLL_TIMEOUT_SECS,
        "allowed_updates": ["message"],
    });
    if let Some(offset) = offset {
        body["offset"] = json!(offset);
    }
    body
}

fn send_message_body(chat_id: i64, text: &str, button: Option<&LaunchButton>) -> Value {
    let mut body = json!({
        "chat_id": chat_id,
        "text": text,
    });
    if let Some(button) = button {
        body["reply_markup"] = json!({
            "inline_keyboard": [[{
                "text": button.text,
                "web_app": { "url": button.url },
            }]]
        });
    }
    body
}

#[async_trait]
impl MessageTransport for TelegramTransport {
    async fn clear_pending(&self) -> Result<(), TransportError> {
        let _: bool = self
            .call("deleteWebhook", &json!({ "drop_pending_updates": true }))
            .await?;
        Ok(())
    }

    async fn poll(&self, offset: Option<i64>) -> Result<Vec<Update>, TransportError> {
        let raw: Vec<Value> = self.call("getUpdates", &poll_body(offset)).await?;
        Ok(decode_updates(raw))
    }

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        button: Option<&LaunchButton>,
    ) -> Result<(), TransportError> {
        let _: Value = self
            .call("sendMessage", &send_message_body(chat_id, text, button))
            .await?;
        Ok(())
    }
}
