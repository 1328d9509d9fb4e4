use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;

use super::draft::{ChosenRequirement, PollDraft, Step};
use super::error::ValidationError;
use crate::config::DraftConfig;
use crate::platform::{ChatId, MessageRef, UserId};

#[derive(Debug, Clone)]
struct DraftEntry {
    draft: PollDraft,
    step: Step,
}

/// Process-wide, per-user poll drafts. Nothing here survives a restart and
/// drafts left idle past the configured TTL are evicted.
///
/// Setters touch a single field and never validate across fields. Two
/// concurrent updates for the same user are last-write-wins.
pub struct DraftStore {
    drafts: Cache<UserId, DraftEntry>,
}

impl DraftStore {
    pub fn new(config: &DraftConfig) -> Self {
        assert!(config.max_capacity > 0, "Draft store capacity must be positive");
        let drafts = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_idle(Duration::from_secs(config.idle_ttl_seconds))
            .build();
        Self { drafts }
    }

    /// Starts a fresh draft at step 1, replacing any draft the user had.
    pub fn init(&self, user: UserId, chat_id: ChatId) -> PollDraft {
        let draft = PollDraft::new(user, chat_id);
        self.drafts.insert(
            user,
            DraftEntry {
                draft: draft.clone(),
                step: Step::AwaitingRequirement,
            },
        );
        draft
    }

    pub fn get(&self, user: UserId) -> Option<PollDraft> {
        self.drafts.get(&user).map(|entry| entry.draft)
    }

    pub fn step(&self, user: UserId) -> Step {
        self.drafts
            .get(&user)
            .map(|entry| entry.step)
            .unwrap_or_default()
    }

    pub fn set_step(&self, user: UserId, step: Step) -> bool {
        self.update(user, |entry| entry.step = step).is_some()
    }

    pub fn set_requirement(&self, user: UserId, requirement: ChosenRequirement) -> bool {
        self.update(user, |entry| entry.draft.requirement = Some(requirement))
            .is_some()
    }

    pub fn set_question(&self, user: UserId, question: String) -> bool {
        self.update(user, |entry| entry.draft.question = question)
            .is_some()
    }

    pub fn set_description(&self, user: UserId, description: Option<String>) -> bool {
        self.update(user, |entry| entry.draft.description = description)
            .is_some()
    }

    /// Appends an option unless the exact same text is already present.
    /// Returns the number of options after the call.
    pub fn add_option(&self, user: UserId, option: String) -> Result<usize, ValidationError> {
        let mut entry = self
            .drafts
            .get(&user)
            .ok_or(ValidationError::NoActiveDraft)?;
        if entry.draft.options.contains(&option) {
            return Err(ValidationError::DuplicateOption(option));
        }
        entry.draft.options.push(option);
        let count = entry.draft.options.len();
        self.drafts.insert(user, entry);
        Ok(count)
    }

    pub fn set_expiry(&self, user: UserId, expires_at: DateTime<Utc>) -> bool {
        self.update(user, |entry| entry.draft.expires_at = Some(expires_at))
            .is_some()
    }

    pub fn set_chooser(&self, user: UserId, chooser: Option<MessageRef>) -> bool {
        self.update(user, |entry| entry.draft.chooser = chooser)
            .is_some()
    }

    /// Removes the draft; the user's step reads as idle afterwards.
    pub fn clear(&self, user: UserId) -> Option<PollDraft> {
        self.drafts.remove(&user).map(|entry| entry.draft)
    }

    pub fn active_drafts(&self) -> u64 {
        self.drafts.run_pending_tasks();
        self.drafts.entry_count()
    }

    fn update<R>(&self, user: UserId, apply: impl FnOnce(&mut DraftEntry) -> R) -> Option<R> {
        let mut entry = self.drafts.get(&user)?;
        let result = apply(&mut entry);
        self.drafts.insert(user, entry);
        Some(result)
    }
}
