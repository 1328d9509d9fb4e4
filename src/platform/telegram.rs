//! Telegram Bot API transport for the [`ChatPlatform`] capability set,
//! plus the long-polling update feed consumed by the bot poller.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{
    Button, ChatId, ChatMember, ChatPlatform, Keyboard, MemberStatus, MessageId, MessageRef,
    PlatformError, UserId,
};

const PARSE_MODE: &str = "Markdown";
const NOT_MODIFIED: &str = "message is not modified";

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl TelegramClient {
    pub fn new(api_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        assert!(!api_url.is_empty(), "Telegram API url must be provided");
        assert!(!token.is_empty(), "Telegram bot token must be provided");
        assert!(
            timeout >= Duration::from_millis(100),
            "Timeout below 100ms is unsafe"
        );

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Telegram HTTP client")?;

        Ok(Self {
            http,
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
            timeout,
        })
    }

    /// Long-polls for updates after `offset`. The request deadline is
    /// extended by the long-poll window so an idle wait is not a timeout.
    pub async fn get_updates(
        &self,
        offset: i64,
        long_poll: Duration,
    ) -> Result<Vec<Update>, PlatformError> {
        let params = json!({
            "offset": offset,
            "timeout": long_poll.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        let response = self
            .http
            .post(self.method_url("getUpdates"))
            .timeout(long_poll + self.timeout)
            .json(&params)
            .send()
            .await?;
        let envelope: Envelope<Vec<Update>> = response.json().await?;
        envelope.into_result("getUpdates")
    }

    async fn call<P, R>(&self, method: &'static str, params: &P) -> Result<R, PlatformError>
    where
        P: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.method_url(method))
            .json(params)
            .send()
            .await?;
        let envelope: Envelope<R> = response.json().await?;
        envelope.into_result(method)
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }
}

#[async_trait]
impl ChatPlatform for TelegramClient {
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageId, PlatformError> {
        let mut params = json!({
            "chat_id": chat.0,
            "text": to_legacy_markdown(text),
            "parse_mode": PARSE_MODE,
            "disable_web_page_preview": true,
        });
        if let Some(keyboard) = keyboard {
            params["reply_markup"] = reply_markup(keyboard);
        }
        let message: Message = self.call("sendMessage", &params).await?;
        debug!(chat_id = %chat, message_id = message.message_id, "Message sent");
        Ok(MessageId(message.message_id))
    }

    async fn edit_message_text(
        &self,
        message: MessageRef,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), PlatformError> {
        let mut params = json!({
            "chat_id": message.chat_id.0,
            "message_id": message.message_id.0,
            "text": to_legacy_markdown(text),
            "parse_mode": PARSE_MODE,
            "disable_web_page_preview": true,
        });
        if let Some(keyboard) = keyboard {
            params["reply_markup"] = reply_markup(keyboard);
        }
        match self.call::<_, serde_json::Value>("editMessageText", &params).await {
            Ok(_) => Ok(()),
            Err(PlatformError::Api { description, .. }) if description.contains(NOT_MODIFIED) => {
                debug!(message = %message, "Edit skipped by platform, text unchanged");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), PlatformError> {
        let params = json!({
            "chat_id": message.chat_id.0,
            "message_id": message.message_id.0,
        });
        let _: bool = self.call("deleteMessage", &params).await?;
        Ok(())
    }

    async fn resolve_chat_member(
        &self,
        chat: ChatId,
        user: UserId,
    ) -> Result<ChatMember, PlatformError> {
        let params = json!({ "chat_id": chat.0, "user_id": user.0 });
        let member: RawChatMember = self.call("getChatMember", &params).await?;
        Ok(member.into())
    }

    async fn chat_administrators(&self, chat: ChatId) -> Result<Vec<ChatMember>, PlatformError> {
        let params = json!({ "chat_id": chat.0 });
        let members: Vec<RawChatMember> = self.call("getChatAdministrators", &params).await?;
        Ok(members.into_iter().map(ChatMember::from).collect())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), PlatformError> {
        let mut params = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            params["text"] = json!(text);
        }
        let _: bool = self.call("answerCallbackQuery", &params).await?;
        Ok(())
    }
}

/// Telegram's legacy Markdown marks bold with a single asterisk.
fn to_legacy_markdown(text: &str) -> String {
    text.replace("**", "*")
}

fn reply_markup(keyboard: &Keyboard) -> serde_json::Value {
    let rows: Vec<Vec<InlineButton<'_>>> = keyboard
        .iter()
        .map(|row| row.iter().map(InlineButton::from).collect())
        .collect();
    json!({ "inline_keyboard": rows })
}

#[derive(Serialize)]
struct InlineButton<'a> {
    text: &'a str,
    callback_data: &'a str,
}

impl<'a> From<&'a Button> for InlineButton<'a> {
    fn from(button: &'a Button) -> Self {
        Self {
            text: &button.text,
            callback_data: &button.callback_data,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

impl<T> Envelope<T> {
    fn into_result(self, method: &'static str) -> Result<T, PlatformError> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(PlatformError::Api {
                method,
                description: self
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawChatMember {
    status: String,
    user: User,
}

impl From<RawChatMember> for ChatMember {
    fn from(raw: RawChatMember) -> Self {
        ChatMember {
            user_id: UserId(raw.user.id),
            status: MemberStatus::parse(&raw.status),
            display_name: raw.user.first_name,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: ChatKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_asterisks_become_legacy_bold() {
        assert_eq!(to_legacy_markdown("**Poll #1: Hi?**"), "*Poll #1: Hi?*");
    }

    #[test]
    fn keyboard_serializes_as_inline_markup() {
        let keyboard = vec![vec![Button::new("Red", "0;7;1:2;Vote")]];
        let markup = reply_markup(&keyboard);
        assert_eq!(markup["inline_keyboard"][0][0]["text"], "Red");
        assert_eq!(markup["inline_keyboard"][0][0]["callback_data"], "0;7;1:2;Vote");
    }

    #[test]
    fn failed_envelope_carries_description() {
        let envelope: Envelope<bool> = serde_json::from_str(
            r#"{"ok":false,"description":"Bad Request: message is not modified"}"#,
        )
        .expect("valid envelope");
        match envelope.into_result("editMessageText") {
            Err(PlatformError::Api { description, .. }) => {
                assert!(description.contains(NOT_MODIFIED))
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn update_with_callback_query_decodes() {
        let raw = r#"{
            "update_id": 10,
            "callback_query": {
                "id": "cb-1",
                "from": {"id": 5, "first_name": "Ann"},
                "message": {"message_id": 9, "chat": {"id": -100, "type": "supergroup"}, "text": "Poll"},
                "data": "0;7;5:3;Vote"
            }
        }"#;
        let update: Update = serde_json::from_str(raw).expect("valid update");
        let query = update.callback_query.expect("callback query");
        assert_eq!(query.from.id, 5);
        let message = query.message.expect("origin message");
        assert_eq!(message.chat.kind, ChatKind::Supergroup);
        assert_eq!(query.data.as_deref(), Some("0;7;5:3;Vote"));
    }
}
