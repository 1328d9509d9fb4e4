use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod telegram;

/// Identifier of a chat user. Private chats with the bot share the user's id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

/// Identifier of a group, channel or private chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<UserId> for ChatId {
    fn from(user: UserId) -> Self {
        ChatId(user.0)
    }
}

/// A concrete message inside a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

impl MessageRef {
    pub fn new(chat_id: ChatId, message_id: MessageId) -> Self {
        Self {
            chat_id,
            message_id,
        }
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chat_id, self.message_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub callback_data: String,
}

impl Button {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Inline keyboard, row by row.
pub type Keyboard = Vec<Vec<Button>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    Left,
    Kicked,
    Unknown,
}

impl MemberStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "creator" => MemberStatus::Creator,
            "administrator" => MemberStatus::Administrator,
            "member" | "restricted" => MemberStatus::Member,
            "left" => MemberStatus::Left,
            "kicked" => MemberStatus::Kicked,
            _ => MemberStatus::Unknown,
        }
    }

    pub fn is_admin(self) -> bool {
        matches!(self, MemberStatus::Creator | MemberStatus::Administrator)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMember {
    pub user_id: UserId,
    pub status: MemberStatus,
    pub display_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("chat platform request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("chat platform rejected {method}: {description}")]
    Api {
        method: &'static str,
        description: String,
    },
}

/// Capabilities the poll engine needs from the chat platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageId, PlatformError>;

    /// Replaces the text of a message. `None` strips any inline keyboard.
    /// Must succeed when the platform reports the message as unchanged.
    async fn edit_message_text(
        &self,
        message: MessageRef,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), PlatformError>;

    async fn delete_message(&self, message: MessageRef) -> Result<(), PlatformError>;

    async fn resolve_chat_member(
        &self,
        chat: ChatId,
        user: UserId,
    ) -> Result<ChatMember, PlatformError>;

    async fn chat_administrators(&self, chat: ChatId) -> Result<Vec<ChatMember>, PlatformError>;

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), PlatformError>;
}
