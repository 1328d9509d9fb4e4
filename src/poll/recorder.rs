use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use super::error::PollError;
use super::render::{NamedVote, UNKNOWN_VOTER, render_poll, render_voter_list};
use super::sync::{DisplayBinding, MessageSynchronizer, SyncReport};
use crate::backend::PollBackend;
use crate::models::poll::{PollId, PublishedPoll, VoteRequest, VoteTally};
use crate::platform::{ChatId, ChatPlatform, MessageRef, UserId};

/// The message a button was pressed on, as currently displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginMessage {
    pub message: MessageRef,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteOutcome {
    pub vote_cast: bool,
    pub sync: SyncReport,
}

pub struct VoteRecorder {
    backend: Arc<dyn PollBackend>,
    platform: Arc<dyn ChatPlatform>,
    synchronizer: MessageSynchronizer,
    platform_name: String,
}

impl VoteRecorder {
    pub fn new(
        backend: Arc<dyn PollBackend>,
        platform: Arc<dyn ChatPlatform>,
        synchronizer: MessageSynchronizer,
        platform_name: String,
    ) -> Self {
        Self {
            backend,
            platform,
            synchronizer,
            platform_name,
        }
    }

    /// Handles a vote button on the public message. Votes on an expired poll
    /// are not submitted, but both messages are still refreshed.
    pub async fn record_vote(
        &self,
        voter: UserId,
        option_index: usize,
        poll_id: PollId,
        admin: MessageRef,
        origin: &OriginMessage,
    ) -> Result<VoteOutcome, PollError> {
        let poll = self.fetch_poll(poll_id).await?;
        let now = Utc::now();

        let vote_cast = if poll.content.has_expired(now) {
            debug!(poll_id = %poll_id, user_id = %voter, "Poll expired, vote not submitted");
            false
        } else if option_index >= poll.content.options.len() {
            warn!(poll_id = %poll_id, option_index, "Vote for unknown option ignored");
            false
        } else {
            let request = VoteRequest {
                platform: self.platform_name.clone(),
                poll_id,
                voter_id: voter,
                option_index,
            };
            self.backend.vote(&request).await?;
            info!(poll_id = %poll_id, user_id = %voter, option_index, "Vote submitted");
            true
        };

        let binding = DisplayBinding {
            public: origin.message,
            admin,
        };
        let sync = self.refresh(&poll, binding, &origin.text).await?;
        Ok(VoteOutcome { vote_cast, sync })
    }

    /// "Update Result" pressed on the admin message.
    pub async fn update_result(
        &self,
        poll_id: PollId,
        public: MessageRef,
        origin: &OriginMessage,
    ) -> Result<SyncReport, PollError> {
        let poll = self.fetch_poll(poll_id).await?;
        let binding = DisplayBinding {
            public,
            admin: origin.message,
        };
        self.refresh(&poll, binding, &origin.text).await
    }

    /// "List Voters" pressed on the admin message. Sends a private summary
    /// to the requester and never touches the poll messages.
    pub async fn list_voters(
        &self,
        requester: UserId,
        poll_id: PollId,
        public: MessageRef,
    ) -> Result<(), PollError> {
        let poll = self.fetch_poll(poll_id).await?;
        let result = self.backend.poll_result(poll_id).await?;
        let voters = self.backend.poll_voters(poll_id).await?;
        let tally = VoteTally::from_backend(&poll.content.options, &result, &voters);

        let named = poll.content.options.iter().map(|option| {
            let entries = voters.get(option).cloned().unwrap_or_default();
            self.resolve_names(public.chat_id, entries)
        });
        let named: Vec<Vec<NamedVote>> = join_all(named).await;

        let text = render_voter_list(&poll.content, &tally, &named);
        self.platform
            .send_message(ChatId::from(requester), &text, None)
            .await?;
        Ok(())
    }

    async fn resolve_names(
        &self,
        chat: ChatId,
        entries: Vec<crate::models::poll::VoterWeight>,
    ) -> Vec<NamedVote> {
        let lookups = entries.into_iter().map(|entry| async move {
            let name = match self.platform.resolve_chat_member(chat, entry.voter_id).await {
                Ok(member) if !member.display_name.is_empty() => member.display_name,
                Ok(_) => UNKNOWN_VOTER.to_string(),
                Err(err) => {
                    debug!(user_id = %entry.voter_id, "Voter name unresolved: {err}");
                    UNKNOWN_VOTER.to_string()
                }
            };
            NamedVote {
                name,
                weight: entry.weight,
            }
        });
        join_all(lookups).await
    }

    async fn fetch_poll(&self, poll_id: PollId) -> Result<PublishedPoll, PollError> {
        self.backend
            .poll(poll_id)
            .await?
            .ok_or(PollError::UnknownPoll(poll_id))
    }

    async fn refresh(
        &self,
        poll: &PublishedPoll,
        binding: DisplayBinding,
        displayed: &str,
    ) -> Result<SyncReport, PollError> {
        let sequence = self.synchronizer.ledger().begin();
        let result = self.backend.poll_result(poll.id).await?;
        let voters = self.backend.poll_voters(poll.id).await?;
        let tally = VoteTally::from_backend(&poll.content.options, &result, &voters);

        let now = Utc::now();
        let rendered = render_poll(poll, &tally, now);
        Ok(self
            .synchronizer
            .synchronize(poll, binding, displayed, &rendered, sequence, now)
            .await)
    }
}
