//! Classifies incoming Telegram updates and hands them to the poll service.

pub mod poller;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::platform::telegram::{CallbackQuery, ChatKind, Message, Update};
use crate::platform::{ChatId, ChatPlatform, MessageId, MessageRef, UserId};
use crate::poll::PollService;
use crate::poll::recorder::OriginMessage;

const HELP: &str = "Hello there! I'm the Guild bot.\n\
     I can help the admins of your guild run weighted polls.\n\n\
     /poll - start creating a poll (use it in your guild's group)\n\
     /enough - finish adding options\n\
     /done - publish the poll you created\n\
     /reset - restart the poll creation\n\
     /cancel - stop the poll creation\n\
     /help - show instructions";
const USE_IN_GUILD: &str = "Please use this command in a guild.";
const USE_IN_PRIVATE: &str = "Please use this command in private";
const NOT_UNDERSTOOD: &str = "I'm sorry, but I couldn't interpret your request.";
const UNKNOWN_COMMAND: &str = "I don't know this command. Use /help to see what I can do.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Poll,
    Enough,
    Done,
    Reset,
    Cancel,
    Help,
    Unknown(String),
}

impl Command {
    /// Commands are recognized before anything else, so `/done` is never
    /// stored as a question, option or duration. `/cmd@BotName args` is
    /// accepted.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.trim_start().strip_prefix('/')?.split_whitespace().next()?;
        let name = word.split('@').next().unwrap_or(word).to_ascii_lowercase();
        let command = match name.as_str() {
            "poll" => Command::Poll,
            "enough" => Command::Enough,
            "done" => Command::Done,
            "reset" => Command::Reset,
            "cancel" => Command::Cancel,
            "help" | "start" => Command::Help,
            _ => Command::Unknown(name),
        };
        Some(command)
    }

    fn private_only(&self) -> bool {
        matches!(
            self,
            Command::Enough | Command::Done | Command::Reset | Command::Cancel
        )
    }
}

pub struct BotRouter {
    service: Arc<PollService>,
    platform: Arc<dyn ChatPlatform>,
}

impl BotRouter {
    pub fn new(service: Arc<PollService>, platform: Arc<dyn ChatPlatform>) -> Self {
        Self { service, platform }
    }

    pub fn service(&self) -> &PollService {
        &self.service
    }

    pub async fn handle_update(&self, update: Update) {
        if let Some(query) = update.callback_query {
            self.handle_callback(query).await;
        } else if let Some(message) = update.message {
            self.handle_message(message).await;
        } else {
            debug!(update_id = update.update_id, "Ignoring unsupported update");
        }
    }

    async fn handle_message(&self, message: Message) {
        let (Some(from), Some(text)) = (message.from.as_ref(), message.text.as_deref()) else {
            return;
        };
        let user = UserId(from.id);
        let chat = ChatId(message.chat.id);
        let private = message.chat.kind == ChatKind::Private;
        let group = matches!(message.chat.kind, ChatKind::Group | ChatKind::Supergroup);

        let Some(command) = Command::parse(text) else {
            if private {
                self.handle_text(user, text).await;
            }
            return;
        };
        debug!(user_id = %user, chat_id = %chat, command = ?command, "Command received");

        if command.private_only() && !private {
            self.reply(chat, USE_IN_PRIVATE).await;
            return;
        }

        match command {
            Command::Poll if group => {
                if let Err(err) = self.service.start_draft(user, chat).await {
                    warn!(user_id = %user, chat_id = %chat, "Poll creation couldn't start: {err}");
                }
            }
            Command::Poll => self.reply(chat, USE_IN_GUILD).await,
            Command::Enough => self.service.enough(user).await,
            Command::Done => {
                if let Err(err) = self.service.finish(user).await {
                    warn!(user_id = %user, "Poll publication failed: {err}");
                }
            }
            Command::Reset => {
                if let Err(err) = self.service.reset(user).await {
                    warn!(user_id = %user, "Poll creation reset failed: {err}");
                }
            }
            Command::Cancel => self.service.cancel(user).await,
            Command::Help => self.reply(chat, HELP).await,
            Command::Unknown(name) if private => {
                debug!(user_id = %user, command = %name, "Unknown command");
                self.reply(chat, UNKNOWN_COMMAND).await;
            }
            Command::Unknown(_) => {}
        }
    }

    async fn handle_text(&self, user: UserId, text: &str) {
        match self.service.handle_text(user, text).await {
            Ok(true) => {}
            Ok(false) => self.reply(ChatId::from(user), NOT_UNDERSTOOD).await,
            Err(err) => warn!(user_id = %user, "Conversation step failed: {err}"),
        }
    }

    /// Every button press is acknowledged, recognized or not.
    async fn handle_callback(&self, query: CallbackQuery) {
        let user = UserId(query.from.id);
        let origin = query.message.as_ref().map(|message| OriginMessage {
            message: MessageRef::new(ChatId(message.chat.id), MessageId(message.message_id)),
            text: message.text.clone().unwrap_or_default(),
        });

        let mut notice = None;
        if let Some(data) = query.data.as_deref() {
            match self.service.handle_button(user, data, origin).await {
                Ok(true) => {}
                Ok(false) => debug!(user_id = %user, data, "Unrecognized button press"),
                Err(err) => {
                    warn!(user_id = %user, data, "Button press failed: {err}");
                    notice = err.user_notice();
                }
            }
        }

        if let Err(err) = self.platform.answer_callback(&query.id, notice).await {
            debug!(callback_id = %query.id, "Couldn't answer callback: {err}");
        }
    }

    async fn reply(&self, chat: ChatId, text: &str) {
        if let Err(err) = self.platform.send_message(chat, text, None).await {
            warn!(chat_id = %chat, "Couldn't deliver reply: {err}");
        }
    }
}
