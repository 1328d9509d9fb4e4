//! In-memory collaborators for exercising the poll engine without network.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::backend::{BackendError, PollBackend};
use crate::models::guild::{Guild, GuildRef, Requirement, Role};
use crate::models::poll::{
    CreatePollRequest, PollContent, PollId, PollResult, PollVoters, PublishedPoll, VoteRequest,
    Weighting,
};
use crate::platform::{
    ChatId, ChatMember, ChatPlatform, Keyboard, MemberStatus, MessageId, MessageRef,
    PlatformError, UserId,
};

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub message: MessageRef,
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditedMessage {
    pub message: MessageRef,
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

#[derive(Default)]
pub struct RecordingPlatform {
    next_message_id: AtomicI64,
    sent: Mutex<Vec<SentMessage>>,
    edits: Mutex<Vec<EditedMessage>>,
    deleted: Mutex<Vec<MessageRef>>,
    answered: Mutex<Vec<(String, Option<String>)>>,
    failing_edits: Mutex<HashSet<MessageRef>>,
    failing_sends: Mutex<HashSet<ChatId>>,
    members: Mutex<HashMap<(ChatId, UserId), ChatMember>>,
    administrators: Mutex<HashMap<ChatId, Vec<ChatMember>>>,
}

impl RecordingPlatform {
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts_to(&self, chat: ChatId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|sent| sent.message.chat_id == chat)
            .map(|sent| sent.text)
            .collect()
    }

    pub fn last_text_to(&self, chat: ChatId) -> Option<String> {
        self.texts_to(chat).pop()
    }

    pub fn edits(&self) -> Vec<EditedMessage> {
        self.edits.lock().unwrap().clone()
    }

    /// Most recent edit applied to `message`.
    pub fn edit_of(&self, message: MessageRef) -> Option<EditedMessage> {
        self.edits()
            .into_iter()
            .rev()
            .find(|edit| edit.message == message)
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn answered(&self) -> Vec<String> {
        self.answered
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Text shown with each callback answer, in answer order.
    pub fn callback_notices(&self) -> Vec<Option<String>> {
        self.answered
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn fail_edits_for(&self, message: MessageRef) {
        self.failing_edits.lock().unwrap().insert(message);
    }

    pub fn fail_sends_to(&self, chat: ChatId) {
        self.failing_sends.lock().unwrap().insert(chat);
    }

    pub fn add_member(&self, chat: ChatId, user: UserId, name: &str) {
        self.members.lock().unwrap().insert(
            (chat, user),
            ChatMember {
                user_id: user,
                status: MemberStatus::Member,
                display_name: name.to_string(),
            },
        );
    }

    pub fn add_administrator(&self, chat: ChatId, user: UserId) {
        self.administrators
            .lock()
            .unwrap()
            .entry(chat)
            .or_default()
            .push(ChatMember {
                user_id: user,
                status: MemberStatus::Administrator,
                display_name: format!("admin{user}"),
            });
    }
}

fn rejected(method: &'static str) -> PlatformError {
    PlatformError::Api {
        method,
        description: "Forbidden: simulated failure".to_string(),
    }
}

#[async_trait]
impl ChatPlatform for RecordingPlatform {
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageId, PlatformError> {
        if self.failing_sends.lock().unwrap().contains(&chat) {
            return Err(rejected("sendMessage"));
        }
        let id = MessageId(self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.sent.lock().unwrap().push(SentMessage {
            message: MessageRef::new(chat, id),
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        Ok(id)
    }

    async fn edit_message_text(
        &self,
        message: MessageRef,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), PlatformError> {
        if self.failing_edits.lock().unwrap().contains(&message) {
            return Err(rejected("editMessageText"));
        }
        self.edits.lock().unwrap().push(EditedMessage {
            message,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        Ok(())
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), PlatformError> {
        self.deleted.lock().unwrap().push(message);
        Ok(())
    }

    async fn resolve_chat_member(
        &self,
        chat: ChatId,
        user: UserId,
    ) -> Result<ChatMember, PlatformError> {
        self.members
            .lock()
            .unwrap()
            .get(&(chat, user))
            .cloned()
            .ok_or_else(|| rejected("getChatMember"))
    }

    async fn chat_administrators(&self, chat: ChatId) -> Result<Vec<ChatMember>, PlatformError> {
        Ok(self
            .administrators
            .lock()
            .unwrap()
            .get(&chat)
            .cloned()
            .unwrap_or_default())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), PlatformError> {
        self.answered
            .lock()
            .unwrap()
            .push((callback_id.to_string(), text.map(str::to_string)));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockBackend {
    next_poll_id: AtomicU64,
    guilds: Mutex<HashMap<u64, Guild>>,
    chat_guilds: Mutex<HashMap<ChatId, u64>>,
    admins: Mutex<HashSet<(ChatId, UserId)>>,
    admin_check_unavailable: Mutex<bool>,
    guild_lookup_unavailable: Mutex<bool>,
    votes_unavailable: Mutex<bool>,
    creation_rejection: Mutex<Option<String>>,
    polls: Mutex<HashMap<PollId, PublishedPoll>>,
    results: Mutex<HashMap<PollId, PollResult>>,
    voters: Mutex<HashMap<PollId, PollVoters>>,
    votes: Mutex<Vec<VoteRequest>>,
    created: Mutex<Vec<CreatePollRequest>>,
}

impl MockBackend {
    /// Binds `chat` to a guild offering one ERC20 and one NFT requirement.
    pub fn with_guild(self, chat: ChatId, guild_id: u64) -> Self {
        let guild = Guild {
            id: guild_id,
            name: format!("guild{guild_id}"),
            roles: vec![Role {
                requirements: vec![
                    Requirement {
                        id: 9,
                        kind: "ERC20".to_string(),
                        name: "MILK".to_string(),
                        chain: "POLYGON".to_string(),
                        address: Some("0xmilk".to_string()),
                    },
                    Requirement {
                        id: 10,
                        kind: "ERC721".to_string(),
                        name: "COW".to_string(),
                        chain: "ETHEREUM".to_string(),
                        address: None,
                    },
                ],
            }],
        };
        self.guilds.lock().unwrap().insert(guild_id, guild);
        self.chat_guilds.lock().unwrap().insert(chat, guild_id);
        self
    }

    pub fn with_guild_without_tokens(self, chat: ChatId, guild_id: u64) -> Self {
        let guild = Guild {
            id: guild_id,
            name: format!("guild{guild_id}"),
            roles: Vec::new(),
        };
        self.guilds.lock().unwrap().insert(guild_id, guild);
        self.chat_guilds.lock().unwrap().insert(chat, guild_id);
        self
    }

    pub fn with_admin(self, chat: ChatId, user: UserId) -> Self {
        self.admins.lock().unwrap().insert((chat, user));
        self
    }

    pub fn admin_check_unavailable(self) -> Self {
        *self.admin_check_unavailable.lock().unwrap() = true;
        self
    }

    pub fn fail_guild_lookups(&self) {
        *self.guild_lookup_unavailable.lock().unwrap() = true;
    }

    pub fn fail_votes(&self) {
        *self.votes_unavailable.lock().unwrap() = true;
    }

    pub fn reject_creation(&self, message: &str) {
        *self.creation_rejection.lock().unwrap() = Some(message.to_string());
    }

    pub fn insert_poll(&self, poll: PublishedPoll) {
        self.polls.lock().unwrap().insert(poll.id, poll);
    }

    pub fn set_result(&self, poll_id: PollId, result: PollResult) {
        self.results.lock().unwrap().insert(poll_id, result);
    }

    pub fn set_voters(&self, poll_id: PollId, voters: PollVoters) {
        self.voters.lock().unwrap().insert(poll_id, voters);
    }

    pub fn votes(&self) -> Vec<VoteRequest> {
        self.votes.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<CreatePollRequest> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl PollBackend for MockBackend {
    async fn guild(&self, guild_id: u64) -> Result<Option<Guild>, BackendError> {
        Ok(self.guilds.lock().unwrap().get(&guild_id).cloned())
    }

    async fn guild_by_platform_id(&self, chat: ChatId) -> Result<Option<GuildRef>, BackendError> {
        if *self.guild_lookup_unavailable.lock().unwrap() {
            return Err(BackendError::Timeout);
        }
        Ok(self
            .chat_guilds
            .lock()
            .unwrap()
            .get(&chat)
            .map(|id| GuildRef { id: *id }))
    }

    async fn is_admin(&self, chat: ChatId, user: UserId) -> Result<bool, BackendError> {
        if *self.admin_check_unavailable.lock().unwrap() {
            return Err(BackendError::Timeout);
        }
        Ok(self.admins.lock().unwrap().contains(&(chat, user)))
    }

    async fn create_poll(
        &self,
        request: &CreatePollRequest,
    ) -> Result<PublishedPoll, BackendError> {
        if let Some(message) = self.creation_rejection.lock().unwrap().clone() {
            return Err(BackendError::Rejected {
                status: StatusCode::BAD_REQUEST,
                message,
            });
        }
        self.created.lock().unwrap().push(request.clone());
        let id = PollId(self.next_poll_id.fetch_add(1, Ordering::SeqCst) + 1);
        let poll = PublishedPoll {
            id,
            requirement_id: request.requirement_id,
            content: PollContent {
                question: request.question.clone(),
                description: request.description.clone(),
                options: request.options.clone(),
                expires_at: chrono::DateTime::from_timestamp(request.exp_date, 0)
                    .unwrap_or_default(),
                weighting: Some(Weighting {
                    name: "MILK".to_string(),
                    chain: "POLYGON".to_string(),
                }),
            },
        };
        self.insert_poll(poll.clone());
        Ok(poll)
    }

    async fn poll(&self, poll_id: PollId) -> Result<Option<PublishedPoll>, BackendError> {
        Ok(self.polls.lock().unwrap().get(&poll_id).cloned())
    }

    async fn poll_result(&self, poll_id: PollId) -> Result<PollResult, BackendError> {
        Ok(self
            .results
            .lock()
            .unwrap()
            .get(&poll_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn poll_voters(&self, poll_id: PollId) -> Result<PollVoters, BackendError> {
        Ok(self
            .voters
            .lock()
            .unwrap()
            .get(&poll_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn vote(&self, request: &VoteRequest) -> Result<(), BackendError> {
        if *self.votes_unavailable.lock().unwrap() {
            return Err(BackendError::Timeout);
        }
        self.votes.lock().unwrap().push(request.clone());
        Ok(())
    }
}
