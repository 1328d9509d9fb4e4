use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use super::draft::CompleteDraft;
use super::error::PollError;
use super::render::{admin_keyboard, render_poll, vote_keyboard};
use super::sync::DisplayBinding;
use crate::backend::PollBackend;
use crate::models::poll::{PollId, VoteTally};
use crate::platform::{ChatId, ChatPlatform, MessageRef};

const CREATION_FAILED: &str = "There was an error while creating the poll.";
const CREATED: &str = "The poll has been created.";
/// Backend rejections worth showing to the user verbatim.
const FORWARDED_REJECTIONS: &[&str] = &["Poll can't be created for this guild."];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOutcome {
    pub poll_id: PollId,
    /// `None` when the messages could not all be created.
    pub binding: Option<DisplayBinding>,
}

pub struct PollPublisher {
    backend: Arc<dyn PollBackend>,
    platform: Arc<dyn ChatPlatform>,
    platform_name: String,
}

impl PollPublisher {
    pub fn new(
        backend: Arc<dyn PollBackend>,
        platform: Arc<dyn ChatPlatform>,
        platform_name: String,
    ) -> Self {
        assert!(!platform_name.is_empty(), "Platform name must be provided");
        Self {
            backend,
            platform,
            platform_name,
        }
    }

    /// Submits the draft and creates the admin and public poll messages.
    ///
    /// Only a backend failure is an error. Message delivery problems after
    /// the poll exists are logged and reflected in the returned binding.
    pub async fn publish(&self, draft: CompleteDraft) -> Result<PublishOutcome, PollError> {
        let owner_chat = ChatId::from(draft.owner);
        let request = draft.to_request(&self.platform_name, Utc::now());

        let poll = match self.backend.create_poll(&request).await {
            Ok(poll) => poll,
            Err(err) => {
                error!(user_id = %draft.owner, chat_id = %draft.chat_id, "Poll creation failed: {err}");
                self.notify(owner_chat, CREATION_FAILED).await;
                if let Some(message) = err
                    .backend_message()
                    .filter(|message| FORWARDED_REJECTIONS.contains(message))
                {
                    self.notify(owner_chat, message).await;
                }
                return Err(err.into());
            }
        };
        info!(
            poll_id = %poll.id,
            requirement_id = poll.requirement_id,
            chat_id = %draft.chat_id,
            "Poll created"
        );

        let now = Utc::now();
        let text = render_poll(&poll, &VoteTally::empty(poll.content.options.len()), now);
        // The deadline can pass while the draft waits for /done.
        let expired = poll.content.has_expired(now);

        let admin = match self.platform.send_message(owner_chat, &text, None).await {
            Ok(message_id) => MessageRef::new(owner_chat, message_id),
            Err(err) => {
                warn!(poll_id = %poll.id, "Couldn't send admin poll message: {err}");
                return Ok(PublishOutcome {
                    poll_id: poll.id,
                    binding: None,
                });
            }
        };

        let votes = (!expired).then(|| vote_keyboard(poll.id, &poll.content.options, admin));
        let public = match self
            .platform
            .send_message(draft.chat_id, &text, votes.as_ref())
            .await
        {
            Ok(message_id) => MessageRef::new(draft.chat_id, message_id),
            Err(err) => {
                warn!(poll_id = %poll.id, chat_id = %draft.chat_id, "Couldn't send public poll message: {err}");
                return Ok(PublishOutcome {
                    poll_id: poll.id,
                    binding: None,
                });
            }
        };

        if expired {
            info!(poll_id = %poll.id, "Poll published after its deadline, no buttons attached");
        } else {
            let controls = admin_keyboard(poll.id, public);
            if let Err(err) = self
                .platform
                .edit_message_text(admin, &text, Some(&controls))
                .await
            {
                warn!(poll_id = %poll.id, "Couldn't attach admin controls: {err}");
            }
        }

        self.notify(owner_chat, CREATED).await;
        Ok(PublishOutcome {
            poll_id: poll.id,
            binding: Some(DisplayBinding { public, admin }),
        })
    }

    async fn notify(&self, chat: ChatId, text: &str) {
        if let Err(err) = self.platform.send_message(chat, text, None).await {
            warn!(chat_id = %chat, "Couldn't deliver message: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::poll::PollContent;
    use crate::platform::UserId;
    use crate::poll::draft::ChosenRequirement;
    use crate::testing::{MockBackend, RecordingPlatform};
    use chrono::Duration;

    const OWNER: UserId = UserId(42);
    const GROUP: ChatId = ChatId(-1001);

    fn draft() -> CompleteDraft {
        CompleteDraft {
            owner: OWNER,
            chat_id: GROUP,
            requirement: ChosenRequirement {
                id: 9,
                name: "MILK".to_string(),
                chain: "POLYGON".to_string(),
            },
            content: PollContent {
                question: "Red or blue?".to_string(),
                description: None,
                options: vec!["Red".to_string(), "Blue".to_string()],
                expires_at: Utc::now() + Duration::days(1),
                weighting: None,
            },
        }
    }

    fn publisher(backend: Arc<MockBackend>, platform: Arc<RecordingPlatform>) -> PollPublisher {
        PollPublisher::new(backend, platform, "TELEGRAM".to_string())
    }

    #[tokio::test]
    async fn publish_creates_bound_admin_and_public_messages() {
        let backend = Arc::new(MockBackend::default());
        let platform = Arc::new(RecordingPlatform::default());
        let outcome = publisher(backend.clone(), platform.clone())
            .publish(draft())
            .await
            .expect("published");

        let binding = outcome.binding.expect("both messages exist");
        assert_eq!(binding.admin.chat_id, ChatId::from(OWNER));
        assert_eq!(binding.public.chat_id, GROUP);

        let created = backend.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].platform, "TELEGRAM");
        assert_eq!(created[0].platform_id, "-1001");

        let public = platform
            .sent()
            .into_iter()
            .find(|sent| sent.message == binding.public)
            .expect("public message sent");
        assert!(public.text.contains("a) Red\n▫️0%"));
        assert!(public.text.contains("b) Blue\n▫️0%"));
        let votes = public.keyboard.expect("vote buttons");
        assert_eq!(
            votes[1][0].callback_data,
            format!("1;{};{};Vote", outcome.poll_id, binding.admin)
        );

        let controls = platform
            .edit_of(binding.admin)
            .and_then(|edit| edit.keyboard)
            .expect("admin controls attached");
        assert_eq!(controls[0][0].text, "List Voters");
        assert_eq!(
            controls[0][0].callback_data,
            format!("{};{};ListVoters", binding.public, outcome.poll_id)
        );
        assert_eq!(
            platform.last_text_to(ChatId::from(OWNER)).as_deref(),
            Some(CREATED)
        );
    }

    #[tokio::test]
    async fn backend_rejection_apologizes_and_forwards_known_reason() {
        let backend = Arc::new(MockBackend::default());
        backend.reject_creation("Poll can't be created for this guild.");
        let platform = Arc::new(RecordingPlatform::default());

        let result = publisher(backend, platform.clone()).publish(draft()).await;
        assert!(matches!(result, Err(PollError::BackendUnavailable(_))));
        assert_eq!(
            platform.texts_to(ChatId::from(OWNER)),
            vec![
                CREATION_FAILED.to_string(),
                "Poll can't be created for this guild.".to_string()
            ]
        );
        assert!(platform.texts_to(GROUP).is_empty());
    }

    #[tokio::test]
    async fn poll_past_its_deadline_is_published_without_buttons() {
        let backend = Arc::new(MockBackend::default());
        let platform = Arc::new(RecordingPlatform::default());
        let mut late = draft();
        late.content.expires_at = Utc::now() - Duration::minutes(1);

        let outcome = publisher(backend, platform.clone())
            .publish(late)
            .await
            .expect("published");

        let binding = outcome.binding.expect("both messages exist");
        let public = platform
            .sent()
            .into_iter()
            .find(|sent| sent.message == binding.public)
            .expect("public message sent");
        assert!(public.text.contains("Poll has already ended."));
        assert!(public.keyboard.is_none());
        assert!(platform.edit_of(binding.admin).is_none());
    }

    #[tokio::test]
    async fn public_delivery_failure_keeps_backend_poll() {
        let backend = Arc::new(MockBackend::default());
        let platform = Arc::new(RecordingPlatform::default());
        platform.fail_sends_to(GROUP);

        let outcome = publisher(backend.clone(), platform.clone())
            .publish(draft())
            .await
            .expect("backend poll exists");
        assert_eq!(outcome.binding, None);
        assert_eq!(backend.created().len(), 1);
        assert!(platform.edits().is_empty());
    }
}
