//! Poll lifecycle: draft conversation, publication, voting and keeping the
//! two poll messages in sync with the backend tally.

pub mod callback;
pub mod dispatcher;
pub mod draft;
pub mod duration;
pub mod error;
pub mod publisher;
pub mod recorder;
pub mod render;
pub mod store;
pub mod sync;

use std::sync::Arc;

use tracing::debug;

use self::callback::CallbackPayload;
use self::dispatcher::ConversationDispatcher;
use self::error::PollError;
use self::publisher::{PollPublisher, PublishOutcome};
use self::recorder::{OriginMessage, VoteRecorder};
use self::store::DraftStore;
use self::sync::{MessageSynchronizer, SyncLedger};
use crate::backend::PollBackend;
use crate::config::{DraftConfig, SyncConfig};
use crate::platform::{ChatId, ChatPlatform, UserId};

/// Entry points used by the bot router.
pub struct PollService {
    dispatcher: ConversationDispatcher,
    recorder: VoteRecorder,
}

impl PollService {
    pub fn new(
        backend: Arc<dyn PollBackend>,
        platform: Arc<dyn ChatPlatform>,
        platform_name: &str,
        drafts: &DraftConfig,
        sync: &SyncConfig,
    ) -> Self {
        let publisher = PollPublisher::new(backend.clone(), platform.clone(), platform_name.to_string());
        let dispatcher = ConversationDispatcher::new(
            DraftStore::new(drafts),
            backend.clone(),
            platform.clone(),
            publisher,
        );
        let synchronizer = MessageSynchronizer::new(platform.clone(), SyncLedger::new(sync));
        let recorder = VoteRecorder::new(backend, platform, synchronizer, platform_name.to_string());
        Self {
            dispatcher,
            recorder,
        }
    }

    pub async fn start_draft(&self, user: UserId, chat: ChatId) -> Result<(), PollError> {
        self.dispatcher.start_draft(user, chat).await
    }

    pub async fn handle_text(&self, user: UserId, text: &str) -> Result<bool, PollError> {
        self.dispatcher.handle_text(user, text).await
    }

    /// Routes a button press. Returns `false` for payloads that are not ours
    /// or that arrive without the message they were attached to. Presses on
    /// polls the backend no longer knows are dropped silently.
    pub async fn handle_button(
        &self,
        user: UserId,
        raw: &str,
        origin: Option<OriginMessage>,
    ) -> Result<bool, PollError> {
        let payload = match raw.parse::<CallbackPayload>() {
            Ok(payload) => payload,
            Err(err) => {
                debug!(user_id = %user, "{err}");
                return Ok(false);
            }
        };

        let result = match (&payload, origin) {
            (CallbackPayload::ListVoters { public, poll_id }, _) => self
                .recorder
                .list_voters(user, *poll_id, *public)
                .await
                .map(|()| true),
            (_, None) => {
                debug!(user_id = %user, "Button press without origin message");
                return Ok(false);
            }
            (
                CallbackPayload::Vote {
                    option_index,
                    poll_id,
                    admin,
                },
                Some(origin),
            ) => self
                .recorder
                .record_vote(user, *option_index, *poll_id, *admin, &origin)
                .await
                .map(|_| true),
            (CallbackPayload::UpdateResult { public, poll_id }, Some(origin)) => self
                .recorder
                .update_result(*poll_id, *public, &origin)
                .await
                .map(|_| true),
            (
                CallbackPayload::PickRequirement { .. } | CallbackPayload::DescriptionChoice { .. },
                Some(origin),
            ) => Ok(self
                .dispatcher
                .handle_choice(user, &payload, origin.message)
                .await),
        };

        match result {
            Err(PollError::UnknownPoll(poll_id)) => {
                debug!(poll_id = %poll_id, "Button press for unknown poll ignored");
                Ok(true)
            }
            other => other,
        }
    }

    pub async fn enough(&self, user: UserId) {
        self.dispatcher.enough(user).await
    }

    pub async fn finish(&self, user: UserId) -> Result<Option<PublishOutcome>, PollError> {
        self.dispatcher.finish(user).await
    }

    pub async fn cancel(&self, user: UserId) {
        self.dispatcher.cancel(user).await
    }

    pub async fn reset(&self, user: UserId) -> Result<(), PollError> {
        self.dispatcher.reset(user).await
    }

    pub fn active_drafts(&self) -> u64 {
        self.dispatcher.drafts().active_drafts()
    }
}
