use std::fmt;

use chrono::{DateTime, Utc};

use super::error::{MissingField, ValidationError};
use crate::models::poll::{CreatePollRequest, PollContent, Weighting};
use crate::platform::{ChatId, MessageRef, UserId};

/// Where a user currently is in the poll-building conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Step {
    #[default]
    Idle,
    AwaitingRequirement,
    AwaitingQuestion,
    AwaitingDescriptionChoice,
    AwaitingDescription,
    AwaitingOption,
    AwaitingDuration,
    ReadyToPublish,
}

impl Step {
    pub fn ordinal(self) -> u8 {
        match self {
            Step::Idle => 0,
            Step::AwaitingRequirement => 1,
            Step::AwaitingQuestion => 2,
            Step::AwaitingDescriptionChoice => 3,
            Step::AwaitingDescription => 4,
            Step::AwaitingOption => 5,
            Step::AwaitingDuration => 6,
            Step::ReadyToPublish => 7,
        }
    }

    pub fn is_active(self) -> bool {
        self != Step::Idle
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.ordinal())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChosenRequirement {
    pub id: u64,
    pub name: String,
    pub chain: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollDraft {
    pub owner: UserId,
    pub chat_id: ChatId,
    pub requirement: Option<ChosenRequirement>,
    pub question: String,
    pub description: Option<String>,
    pub options: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Token chooser message still waiting for a pick.
    pub chooser: Option<MessageRef>,
}

impl PollDraft {
    pub fn new(owner: UserId, chat_id: ChatId) -> Self {
        Self {
            owner,
            chat_id,
            requirement: None,
            question: String::new(),
            description: None,
            options: Vec::new(),
            expires_at: None,
            chooser: None,
        }
    }

    /// First field still missing, in conversation order.
    pub fn missing_field(&self) -> Option<MissingField> {
        if self.requirement.as_ref().is_none_or(|r| r.id == 0) {
            return Some(MissingField::Requirement);
        }
        if self.question.is_empty() {
            return Some(MissingField::Question);
        }
        match self.options.len() {
            0 => return Some(MissingField::FirstOption),
            1 => return Some(MissingField::SecondOption),
            _ => {}
        }
        if self.expires_at.is_none() {
            return Some(MissingField::Duration);
        }
        None
    }

    /// The only way to obtain a publishable draft.
    pub fn complete(&self) -> Result<CompleteDraft, ValidationError> {
        if let Some(missing) = self.missing_field() {
            return Err(ValidationError::Incomplete(missing));
        }
        let (Some(requirement), Some(expires_at)) = (self.requirement.clone(), self.expires_at)
        else {
            return Err(ValidationError::Incomplete(MissingField::Requirement));
        };
        Ok(CompleteDraft {
            owner: self.owner,
            chat_id: self.chat_id,
            requirement,
            content: PollContent {
                question: self.question.clone(),
                description: self.description.clone(),
                options: self.options.clone(),
                expires_at,
                weighting: None,
            },
        })
    }
}

/// A draft with every field resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct CompleteDraft {
    pub owner: UserId,
    pub chat_id: ChatId,
    pub requirement: ChosenRequirement,
    pub content: PollContent,
}

impl CompleteDraft {
    /// Content with the chosen token attached, used for previews.
    pub fn preview_content(&self) -> PollContent {
        PollContent {
            weighting: Some(Weighting {
                name: self.requirement.name.clone(),
                chain: self.requirement.chain.clone(),
            }),
            ..self.content.clone()
        }
    }

    pub fn to_request(&self, platform: &str, now: DateTime<Utc>) -> CreatePollRequest {
        CreatePollRequest {
            platform: platform.to_string(),
            platform_id: self.chat_id.to_string(),
            requirement_id: self.requirement.id,
            question: self.content.question.clone(),
            description: self.content.description.clone(),
            options: self.content.options.clone(),
            start_date: now.timestamp(),
            exp_date: self.content.expires_at.timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn filled_draft() -> PollDraft {
        let mut draft = PollDraft::new(UserId(1), ChatId(-100));
        draft.requirement = Some(ChosenRequirement {
            id: 9,
            name: "MILK".to_string(),
            chain: "POLYGON".to_string(),
        });
        draft.question = "Is milk cool?".to_string();
        draft.options = vec!["Yes".to_string(), "No".to_string()];
        draft.expires_at = Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap());
        draft
    }

    #[test]
    fn missing_fields_are_reported_in_order() {
        let mut draft = filled_draft();
        assert_eq!(draft.missing_field(), None);

        draft.expires_at = None;
        assert_eq!(draft.missing_field(), Some(MissingField::Duration));
        draft.options.pop();
        assert_eq!(draft.missing_field(), Some(MissingField::SecondOption));
        draft.options.clear();
        assert_eq!(draft.missing_field(), Some(MissingField::FirstOption));
        draft.question.clear();
        assert_eq!(draft.missing_field(), Some(MissingField::Question));
        draft.requirement = None;
        assert_eq!(draft.missing_field(), Some(MissingField::Requirement));
    }

    #[test]
    fn zero_requirement_counts_as_unset() {
        let mut draft = filled_draft();
        draft.requirement.as_mut().unwrap().id = 0;
        assert_eq!(
            draft.complete(),
            Err(ValidationError::Incomplete(MissingField::Requirement))
        );
    }

    #[test]
    fn complete_draft_builds_backend_request() {
        let complete = filled_draft().complete().expect("draft is complete");
        let now = Utc.with_ymd_and_hms(2029, 12, 31, 0, 0, 0).unwrap();
        let request = complete.to_request("TELEGRAM", now);
        assert_eq!(request.platform_id, "-100");
        assert_eq!(request.requirement_id, 9);
        assert_eq!(request.start_date, now.timestamp());
        assert_eq!(request.exp_date - request.start_date, 86_400);
        assert_eq!(
            complete.preview_content().weighting.map(|w| w.name),
            Some("MILK".to_string())
        );
    }

    #[test]
    fn step_ordinals_are_stable() {
        assert_eq!(Step::default(), Step::Idle);
        assert_eq!(Step::AwaitingRequirement.ordinal(), 1);
        assert!(Step::ReadyToPublish.ordinal() > Step::AwaitingDuration.ordinal());
        assert!(!Step::Idle.is_active());
    }
}
