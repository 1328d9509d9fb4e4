use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::callback::CallbackPayload;
use super::draft::{ChosenRequirement, PollDraft, Step};
use super::duration::resolve_expiry;
use super::error::{PollError, ValidationError};
use super::publisher::{PollPublisher, PublishOutcome};
use super::render::{escape_markdown, render_preview};
use super::store::DraftStore;
use crate::backend::PollBackend;
use crate::models::guild::Guild;
use crate::platform::{Button, ChatId, ChatPlatform, Keyboard, MessageRef, UserId};

const NO_GUILD: &str = "Please use this command in a guild.";
const NOT_ADMIN: &str = "I'm sorry, but only the admins of this guild can create polls.";
const SOMETHING_WRONG: &str = "Something went wrong. Please try again or contact us.";
const NO_TOKENS: &str = "Your guild has no requirement with an appropriate token standard. \
     Creating a weighted poll with the NFT or the 1155 standard is not supported.";
const DRAFT_DISCARDED: &str = "Your previous poll creation process has been discarded.";
const CHOOSER: &str = "Let's start creating your poll. You can use /reset or /cancel to restart \
     or stop the process any time.\n\nFirst, choose a token as the base of the weighted vote.";
const CHOOSE_WITH_BUTTONS: &str = "Please choose a token with the buttons above.";
const QUESTION_PROMPT: &str =
    "Please give me the question/subject of the poll. For example:\n\"Do you think drinking milk is cool?\"";
const DESCRIPTION_CHOICE: &str = "Do you want to add a description to your poll?";
const ANSWER_WITH_BUTTONS: &str = "Please answer with the buttons above.";
const DESCRIPTION_PROMPT: &str = "Please give me the description of your poll.";
const FIRST_OPTION_PROMPT: &str = "Please give me the first option of your poll.";
const SECOND_OPTION_PROMPT: &str = "Please give me the second option of your poll.";
const NEXT_OPTION_PROMPT: &str =
    "Please give me a new option or go to the next step by using /enough";
const DUPLICATE_OPTION: &str = "This option has already been added.";
const DURATION_PROMPT: &str =
    "Please give me the duration of the poll in the DD:HH:mm format (days:hours:minutes)";
const MALFORMED_DURATION: &str =
    "The duration must be in the DD:HH:mm format (days:hours:minutes). Please try again.";
const PREVIEW_FOOTER: &str = "You can accept it by using /done,\n\
     reset the data by using /reset\nor cancel it using /cancel.";
const READY: &str = "Your poll is ready. Use /done to publish it, /reset to start over \
     or /cancel to stop.";
const NOT_FINISHED: &str = "You didn't finish the previous steps.";
const NO_ACTIVE_DRAFT: &str = "You don't have an active poll creation process.";
const CANCELLED: &str = "The current poll creation process has been cancelled.";
const RESTARTED: &str = "The current poll creation procedure has been restarted.";

/// Drives the per-user poll building conversation. All replies go to the
/// user's private chat with the bot.
pub struct ConversationDispatcher {
    drafts: DraftStore,
    backend: Arc<dyn PollBackend>,
    platform: Arc<dyn ChatPlatform>,
    publisher: PollPublisher,
}

impl ConversationDispatcher {
    pub fn new(
        drafts: DraftStore,
        backend: Arc<dyn PollBackend>,
        platform: Arc<dyn ChatPlatform>,
        publisher: PollPublisher,
    ) -> Self {
        Self {
            drafts,
            backend,
            platform,
            publisher,
        }
    }

    pub fn drafts(&self) -> &DraftStore {
        &self.drafts
    }

    /// `/poll` issued by `user` in the group `chat`.
    pub async fn start_draft(&self, user: UserId, chat: ChatId) -> Result<(), PollError> {
        let Some(guild) = self.guild_for_chat(user, chat).await? else {
            return Ok(());
        };

        if !self.is_guild_admin(chat, user).await? {
            info!(user_id = %user, chat_id = %chat, "Poll creation refused, not an admin");
            self.notify(user, NOT_ADMIN).await;
            return Ok(());
        }

        if let Some(previous) = self.drafts.get(user) {
            self.discard_chooser(&previous).await;
            self.notify(user, DRAFT_DISCARDED).await;
        }

        self.drafts.init(user, chat);
        info!(user_id = %user, chat_id = %chat, guild_id = guild.id, "Poll draft started");
        self.send_chooser(user, &guild).await;
        Ok(())
    }

    /// Free text in the private chat. Returns `false` when the user has no
    /// draft, so the caller can fall back to its own reply.
    pub async fn handle_text(&self, user: UserId, text: &str) -> Result<bool, PollError> {
        let step = self.drafts.step(user);
        let text = text.trim();
        debug!(user_id = %user, step = %step, "Conversation input");

        match step {
            Step::Idle => return Ok(false),
            Step::AwaitingRequirement => self.notify(user, CHOOSE_WITH_BUTTONS).await,
            Step::AwaitingQuestion => {
                if text.is_empty() {
                    self.notify(user, QUESTION_PROMPT).await;
                    return Ok(true);
                }
                self.drafts.set_question(user, text.to_string());
                self.drafts.set_step(user, Step::AwaitingDescriptionChoice);
                self.send(user, DESCRIPTION_CHOICE, Some(&description_keyboard()))
                    .await;
            }
            Step::AwaitingDescriptionChoice => self.notify(user, ANSWER_WITH_BUTTONS).await,
            Step::AwaitingDescription => {
                let description = Some(text.to_string()).filter(|d| !d.is_empty());
                self.drafts.set_description(user, description);
                self.drafts.set_step(user, Step::AwaitingOption);
                self.notify(user, FIRST_OPTION_PROMPT).await;
            }
            Step::AwaitingOption => self.add_option(user, text).await,
            Step::AwaitingDuration => self.set_duration(user, text).await,
            Step::ReadyToPublish => self.notify(user, READY).await,
        }
        Ok(true)
    }

    /// Token chooser and description buttons. Presses that do not match the
    /// user's current step are ignored.
    pub async fn handle_choice(
        &self,
        user: UserId,
        payload: &CallbackPayload,
        origin: MessageRef,
    ) -> bool {
        match (self.drafts.step(user), payload) {
            (
                Step::AwaitingRequirement,
                CallbackPayload::PickRequirement {
                    name,
                    chain,
                    requirement_id,
                },
            ) => {
                self.drafts.set_requirement(
                    user,
                    ChosenRequirement {
                        id: *requirement_id,
                        name: name.clone(),
                        chain: chain.clone(),
                    },
                );
                self.drafts.set_chooser(user, None);
                self.drafts.set_step(user, Step::AwaitingQuestion);

                let chosen = format!(
                    "You have chosen {} on {}",
                    escape_markdown(name),
                    escape_markdown(chain)
                );
                if let Err(err) = self.platform.edit_message_text(origin, &chosen, None).await {
                    warn!(user_id = %user, "Couldn't update token chooser: {err}");
                }
                self.notify(user, QUESTION_PROMPT).await;
                true
            }
            (Step::AwaitingDescriptionChoice, CallbackPayload::DescriptionChoice { add: true }) => {
                self.drafts.set_step(user, Step::AwaitingDescription);
                self.notify(user, DESCRIPTION_PROMPT).await;
                true
            }
            (Step::AwaitingDescriptionChoice, CallbackPayload::DescriptionChoice { add: false }) => {
                self.drafts.set_description(user, None);
                self.drafts.set_step(user, Step::AwaitingOption);
                self.notify(user, FIRST_OPTION_PROMPT).await;
                true
            }
            (step, _) => {
                debug!(user_id = %user, step = %step, "Ignoring out of step choice");
                false
            }
        }
    }

    /// `/enough`: closes the option list once there are at least two.
    pub async fn enough(&self, user: UserId) {
        let Some(draft) = self.drafts.get(user) else {
            self.notify(user, NO_ACTIVE_DRAFT).await;
            return;
        };
        if self.drafts.step(user) == Step::AwaitingOption && draft.options.len() >= 2 {
            self.drafts.set_step(user, Step::AwaitingDuration);
            self.notify(user, DURATION_PROMPT).await;
        } else {
            self.notify(user, NOT_FINISHED).await;
        }
    }

    /// `/done`: publishes a complete draft. The draft is removed before
    /// publication starts, whatever the outcome.
    pub async fn finish(&self, user: UserId) -> Result<Option<PublishOutcome>, PollError> {
        let Some(draft) = self.drafts.get(user) else {
            self.notify(user, NO_ACTIVE_DRAFT).await;
            return Ok(None);
        };
        let complete = match draft.complete() {
            Ok(complete) => complete,
            Err(ValidationError::Incomplete(missing)) => {
                debug!(user_id = %user, missing = ?missing, "Draft not ready for publication");
                self.notify(user, missing.prompt()).await;
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        self.drafts.clear(user);
        let outcome = self.publisher.publish(complete).await?;
        Ok(Some(outcome))
    }

    /// `/cancel`: drops the draft at any step.
    pub async fn cancel(&self, user: UserId) {
        match self.drafts.clear(user) {
            Some(draft) => {
                self.discard_chooser(&draft).await;
                info!(user_id = %user, "Poll draft cancelled");
                self.notify(user, CANCELLED).await;
            }
            None => self.notify(user, NO_ACTIVE_DRAFT).await,
        }
    }

    /// `/reset`: starts over for the same chat and re-sends the token chooser.
    /// When the guild can't be looked up the current draft is left as it was.
    pub async fn reset(&self, user: UserId) -> Result<(), PollError> {
        let Some(draft) = self.drafts.get(user) else {
            self.notify(user, NO_ACTIVE_DRAFT).await;
            return Ok(());
        };

        let guild = self.guild_for_chat(user, draft.chat_id).await?;
        self.discard_chooser(&draft).await;
        let Some(guild) = guild else {
            self.drafts.clear(user);
            return Ok(());
        };
        self.drafts.init(user, draft.chat_id);
        info!(user_id = %user, chat_id = %draft.chat_id, "Poll draft restarted");
        self.notify(user, RESTARTED).await;
        self.send_chooser(user, &guild).await;
        Ok(())
    }

    async fn add_option(&self, user: UserId, option: &str) {
        if option.is_empty() {
            self.notify(user, NEXT_OPTION_PROMPT).await;
            return;
        }
        match self.drafts.add_option(user, option.to_string()) {
            Ok(1) => self.notify(user, SECOND_OPTION_PROMPT).await,
            Ok(_) => self.notify(user, NEXT_OPTION_PROMPT).await,
            Err(ValidationError::DuplicateOption(_)) => self.notify(user, DUPLICATE_OPTION).await,
            Err(err) => debug!(user_id = %user, "Option not added: {err}"),
        }
    }

    async fn set_duration(&self, user: UserId, raw: &str) {
        let now = Utc::now();
        let expires_at = match resolve_expiry(raw, now) {
            Ok(expires_at) => expires_at,
            Err(err) => {
                debug!(user_id = %user, "{err}");
                self.notify(user, MALFORMED_DURATION).await;
                return;
            }
        };
        self.drafts.set_expiry(user, expires_at);

        let Some(draft) = self.drafts.get(user) else {
            return;
        };
        match draft.complete() {
            Ok(complete) => {
                self.drafts.set_step(user, Step::ReadyToPublish);
                let preview = render_preview(&complete.preview_content(), now);
                self.notify(user, &preview).await;
                self.notify(user, PREVIEW_FOOTER).await;
            }
            Err(ValidationError::Incomplete(missing)) => self.notify(user, missing.prompt()).await,
            Err(err) => debug!(user_id = %user, "Draft not previewable: {err}"),
        }
    }

    /// Guild bound to `chat`. Tells the user why when there is none.
    async fn guild_for_chat(&self, user: UserId, chat: ChatId) -> Result<Option<Guild>, PollError> {
        let lookup = async {
            let Some(guild_ref) = self.backend.guild_by_platform_id(chat).await? else {
                return Ok(None);
            };
            self.backend.guild(guild_ref.id).await
        };
        match lookup.await {
            Ok(Some(guild)) => Ok(Some(guild)),
            Ok(None) => {
                self.notify(user, NO_GUILD).await;
                Ok(None)
            }
            Err(err) => {
                warn!(user_id = %user, chat_id = %chat, "Guild lookup failed: {err}");
                self.notify(user, SOMETHING_WRONG).await;
                Err(err.into())
            }
        }
    }

    /// Asks the backend first and falls back to the chat's administrator list.
    async fn is_guild_admin(&self, chat: ChatId, user: UserId) -> Result<bool, PollError> {
        match self.backend.is_admin(chat, user).await {
            Ok(is_admin) => Ok(is_admin),
            Err(err) => {
                warn!(chat_id = %chat, "Backend admin check failed, asking the platform: {err}");
                let administrators = self.platform.chat_administrators(chat).await?;
                Ok(administrators
                    .iter()
                    .any(|member| member.user_id == user && member.status.is_admin()))
            }
        }
    }

    async fn send_chooser(&self, user: UserId, guild: &Guild) {
        let requirements = guild.weighting_requirements();
        if requirements.is_empty() {
            self.drafts.clear(user);
            self.notify(user, NO_TOKENS).await;
            return;
        }

        let keyboard: Keyboard = requirements
            .iter()
            .map(|requirement| {
                let label = format!(
                    "{}-{}-{}",
                    requirement.name,
                    requirement.chain,
                    requirement.address.as_deref().unwrap_or_default()
                );
                let payload = CallbackPayload::PickRequirement {
                    name: requirement.name.clone(),
                    chain: requirement.chain.clone(),
                    requirement_id: requirement.id,
                };
                vec![Button::new(label, payload.to_string())]
            })
            .collect();

        if let Some(chooser) = self.send(user, CHOOSER, Some(&keyboard)).await {
            self.drafts.set_chooser(user, Some(chooser));
        }
    }

    async fn discard_chooser(&self, draft: &PollDraft) {
        let Some(chooser) = draft.chooser else {
            return;
        };
        if let Err(err) = self.platform.delete_message(chooser).await {
            debug!(message = %chooser, "Couldn't delete token chooser: {err}");
        }
    }

    async fn notify(&self, user: UserId, text: &str) {
        self.send(user, text, None).await;
    }

    async fn send(&self, user: UserId, text: &str, keyboard: Option<&Keyboard>) -> Option<MessageRef> {
        let chat = ChatId::from(user);
        match self.platform.send_message(chat, text, keyboard).await {
            Ok(message_id) => Some(MessageRef::new(chat, message_id)),
            Err(err) => {
                warn!(user_id = %user, "Couldn't deliver message: {err}");
                None
            }
        }
    }
}

fn description_keyboard() -> Keyboard {
    vec![vec![
        Button::new(
            "Yes",
            CallbackPayload::DescriptionChoice { add: true }.to_string(),
        ),
        Button::new(
            "No",
            CallbackPayload::DescriptionChoice { add: false }.to_string(),
        ),
    ]]
}
