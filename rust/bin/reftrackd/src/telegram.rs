//! Minimal Telegram Bot API client covering the calls the bot makes.

use std::time::Duration;

use serde::{Deserialize, de::DeserializeOwned};

use referral::{GateError, MembershipOracle, UserId};

use crate::poller::{ChatSink, UpdateSource};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Upper bound for every call except the long poll.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra time allowed on top of the long-poll timeout before the HTTP
/// request itself is abandoned.
const POLL_SLACK: Duration = Duration::from_secs(10);

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("network: {0}")]
    Network(#[from] reqwest::Error),

    #[error("telegram API error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("decode: {0}")]
    Decode(String),
}

impl TelegramError {
    /// Server-side or rate-limit failures that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            TelegramError::Network(_) => true,
            TelegramError::Api { code, .. } => *code == 429 || *code >= 500,
            TelegramError::Decode(_) => false,
        }
    }
}

impl From<TelegramError> for GateError {
    fn from(e: TelegramError) -> Self {
        if e.is_transient() {
            GateError::Transport(e.to_string())
        } else {
            GateError::Oracle(e.to_string())
        }
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<T, TelegramError> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            (true, None) => Err(TelegramError::Decode("ok response without result".into())),
            (false, _) => Err(TelegramError::Api {
                code: self.error_code.unwrap_or(0),
                description: self.description.unwrap_or_default(),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<TgUser>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMember {
    status: String,
}

// ── Client ──────────────────────────────────────────────────────────

pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl TelegramClient {
    pub fn new(
        api_base: &str,
        token: &str,
        request_timeout: Duration,
    ) -> Result<Self, TelegramError> {
        let http = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
            request_timeout,
        })
    }

    /// `getUpdates` needs longer than the regular bound; it passes its own.
    fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        requested.unwrap_or(self.request_timeout)
    }

    async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<R, TelegramError> {
        let url = format!("{}/{}", self.base_url, method);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .timeout(self.effective_timeout(timeout))
            .send()
            .await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        decode_response(status.as_u16(), &bytes)
    }

    /// Authenticate the token; returns the bot's username.
    pub async fn get_me(&self) -> Result<String, TelegramError> {
        let me: TgUser = self.call("getMe", &serde_json::json!({}), None).await?;
        Ok(me.username.unwrap_or_default())
    }

    /// Long polling and webhooks are mutually exclusive.
    pub async fn delete_webhook(&self) -> Result<(), TelegramError> {
        let _: bool = self
            .call("deleteWebhook", &serde_json::json!({}), None)
            .await?;
        Ok(())
    }

    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, TelegramError> {
        self.call(
            "getUpdates",
            &serde_json::json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message"],
            }),
            Some(Duration::from_secs(timeout_secs) + POLL_SLACK),
        )
        .await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        let _: serde_json::Value = self
            .call(
                "sendMessage",
                &serde_json::json!({ "chat_id": chat_id, "text": text }),
                None,
            )
            .await?;
        Ok(())
    }

    pub async fn get_chat_member(
        &self,
        chat: &str,
        user_id: UserId,
    ) -> Result<String, TelegramError> {
        let member: ChatMember = self
            .call(
                "getChatMember",
                &serde_json::json!({ "chat_id": chat, "user_id": user_id }),
                None,
            )
            .await?;
        Ok(member.status)
    }
}

fn decode_response<R: DeserializeOwned>(status: u16, body: &[u8]) -> Result<R, TelegramError> {
    let parsed: ApiResponse<R> = serde_json::from_slice(body)
        .map_err(|e| TelegramError::Decode(format!("HTTP {status}: {e}")))?;
    parsed.into_result()
}

#[async_trait::async_trait]
impl MembershipOracle for TelegramClient {
    async fn member_status(&self, user_id: UserId, channel: &str) -> Result<String, GateError> {
        self.get_chat_member(channel, user_id)
            .await
            .map_err(GateError::from)
    }
}

#[async_trait::async_trait]
impl UpdateSource for TelegramClient {
    async fn next_batch(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, TelegramError> {
        self.get_updates(offset, timeout_secs).await
    }
}

#[async_trait::async_trait]
impl ChatSink for TelegramClient {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        self.send_message(chat_id, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_updates() {
        let body = br#"{
            "ok": true,
            "result": [
                {"update_id": 10, "message": {
                    "message_id": 1,
                    "from": {"id": 42, "is_bot": false, "first_name": "A", "username": "alice"},
                    "chat": {"id": 42, "type": "private"},
                    "date": 0,
                    "text": "/start 7"
                }},
                {"update_id": 11, "edited_message": {}}
            ]
        }"#;
        let updates: Vec<Update> = decode_response(200, body).unwrap();
        assert_eq!(updates.len(), 2);
        let msg = updates[0].message.as_ref().unwrap();
        assert_eq!(msg.text.as_deref(), Some("/start 7"));
        assert_eq!(msg.from.as_ref().unwrap().username.as_deref(), Some("alice"));
        assert!(updates[1].message.is_none());
    }

    #[test]
    fn decodes_chat_member_status() {
        let body = br#"{"ok": true, "result": {"status": "member", "user": {"id": 42, "is_bot": false, "first_name": "A"}}}"#;
        let member: ChatMember = decode_response(200, body).unwrap();
        assert_eq!(member.status, "member");
    }

    #[test]
    fn api_errors_carry_code_and_description() {
        let body = br#"{"ok": false, "error_code": 400, "description": "Bad Request: user not found"}"#;
        let err = decode_response::<ChatMember>(400, body).unwrap_err();
        match &err {
            TelegramError::Api { code, description } => {
                assert_eq!(*code, 400);
                assert!(description.contains("user not found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!err.is_transient());
        assert!(matches!(GateError::from(err), GateError::Oracle(_)));
    }

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        let limited = TelegramError::Api {
            code: 429,
            description: "Too Many Requests: retry after 3".into(),
        };
        assert!(limited.is_transient());
        assert!(matches!(GateError::from(limited), GateError::Transport(_)));

        let bad_gateway = TelegramError::Api {
            code: 502,
            description: "Bad Gateway".into(),
        };
        assert!(bad_gateway.is_transient());
    }

    #[test]
    fn garbage_body_is_decode_error() {
        let err = decode_response::<ChatMember>(502, b"<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, TelegramError::Decode(ref m) if m.contains("HTTP 502")));
    }

    #[test]
    fn base_url_strips_trailing_slash() {
        let client =
            TelegramClient::new("https://api.telegram.org/", "123:abc", DEFAULT_REQUEST_TIMEOUT)
                .unwrap();
        assert_eq!(client.base_url, "https://api.telegram.org/bot123:abc");
    }

    #[test]
    fn long_poll_overrides_request_timeout() {
        let client = TelegramClient::new(DEFAULT_API_BASE, "t", Duration::from_secs(7)).unwrap();
        assert_eq!(client.effective_timeout(None), Duration::from_secs(7));
        assert_eq!(
            client.effective_timeout(Some(Duration::from_secs(70))),
            Duration::from_secs(70)
        );
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        // Accepts connections through the backlog but never answers.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let client = TelegramClient::new(&base, "t", Duration::from_millis(300)).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(10), client.send_message(1, "hi"))
            .await
            .expect("request should give up on its own");
        let err = result.unwrap_err();
        assert!(matches!(err, TelegramError::Network(ref e) if e.is_timeout()));
        assert!(err.is_transient());
        drop(listener);
    }
}
