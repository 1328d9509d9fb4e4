use crate::backend::BackendError;
use crate::models::poll::PollId;
use crate::platform::PlatformError;

const BACKEND_APOLOGY: &str = "Sorry, something went wrong. Please try again later.";

/// A draft field that still has to be provided before publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingField {
    Requirement,
    Question,
    FirstOption,
    SecondOption,
    Duration,
}

impl MissingField {
    pub fn prompt(self) -> &'static str {
        match self {
            MissingField::Requirement => {
                "A poll must have a token as the base of the weighted vote."
            }
            MissingField::Question => {
                "A poll must have a question. Please send me the question of your poll."
            }
            MissingField::FirstOption => "A poll must have options. Please send me the first one.",
            MissingField::SecondOption => {
                "A poll must have more than one option. Please send me a second one."
            }
            MissingField::Duration => {
                "A poll must have a duration. Please send me the duration of your poll in DD:HH:mm format."
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("duration {0:?} is not in the DD:HH:mm format")]
    MalformedDuration(String),
    #[error("option {0:?} has already been added")]
    DuplicateOption(String),
    #[error("draft is incomplete: {0:?} missing")]
    Incomplete(MissingField),
    #[error("no active poll creation process")]
    NoActiveDraft,
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(#[from] BackendError),
    #[error("message delivery failed: {0}")]
    PlatformDelivery(#[from] PlatformError),
    #[error("poll {0} is unknown")]
    UnknownPoll(PollId),
}

impl PollError {
    /// Short text for the user whose action failed, when there is one to give.
    pub fn user_notice(&self) -> Option<&'static str> {
        match self {
            PollError::BackendUnavailable(_) => Some(BACKEND_APOLOGY),
            _ => None,
        }
    }
}
