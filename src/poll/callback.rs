//! Button payloads. Fields are `;`-separated with the action tag last;
//! message bindings are written as `<chatId>:<messageId>`.

use std::fmt;
use std::str::FromStr;

use crate::models::poll::PollId;
use crate::platform::{ChatId, MessageId, MessageRef};

const VOTE: &str = "Vote";
const LIST_VOTERS: &str = "ListVoters";
const UPDATE_RESULT: &str = "UpdateResult";
const PICK_REQUIREMENT: &str = "PickRequirement";
const POLL_DESCRIPTION: &str = "PollDescription";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackPayload {
    /// Vote button on the public message; carries the admin message binding.
    Vote {
        option_index: usize,
        poll_id: PollId,
        admin: MessageRef,
    },
    /// Admin control; carries the public message binding.
    ListVoters { public: MessageRef, poll_id: PollId },
    /// Admin control; carries the public message binding.
    UpdateResult { public: MessageRef, poll_id: PollId },
    PickRequirement {
        name: String,
        chain: String,
        requirement_id: u64,
    },
    DescriptionChoice { add: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized callback payload {0:?}")]
pub struct UnrecognizedPayload(pub String);

impl fmt::Display for CallbackPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackPayload::Vote {
                option_index,
                poll_id,
                admin,
            } => write!(f, "{option_index};{poll_id};{admin};{VOTE}"),
            CallbackPayload::ListVoters { public, poll_id } => {
                write!(f, "{public};{poll_id};{LIST_VOTERS}")
            }
            CallbackPayload::UpdateResult { public, poll_id } => {
                write!(f, "{public};{poll_id};{UPDATE_RESULT}")
            }
            CallbackPayload::PickRequirement {
                name,
                chain,
                requirement_id,
            } => write!(f, "{name}-{chain};{requirement_id};{PICK_REQUIREMENT}"),
            CallbackPayload::DescriptionChoice { add } => {
                let answer = if *add { "yes" } else { "no" };
                write!(f, "{answer};{POLL_DESCRIPTION}")
            }
        }
    }
}

impl FromStr for CallbackPayload {
    type Err = UnrecognizedPayload;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let unrecognized = || UnrecognizedPayload(raw.to_string());
        let fields: Vec<&str> = raw.split(';').collect();

        let payload = match fields.as_slice() {
            [option_index, poll_id, admin, VOTE] => CallbackPayload::Vote {
                option_index: option_index.parse().map_err(|_| unrecognized())?,
                poll_id: parse_poll_id(poll_id).ok_or_else(unrecognized)?,
                admin: parse_message_ref(admin).ok_or_else(unrecognized)?,
            },
            [public, poll_id, LIST_VOTERS] => CallbackPayload::ListVoters {
                public: parse_message_ref(public).ok_or_else(unrecognized)?,
                poll_id: parse_poll_id(poll_id).ok_or_else(unrecognized)?,
            },
            [public, poll_id, UPDATE_RESULT] => CallbackPayload::UpdateResult {
                public: parse_message_ref(public).ok_or_else(unrecognized)?,
                poll_id: parse_poll_id(poll_id).ok_or_else(unrecognized)?,
            },
            [label, requirement_id, PICK_REQUIREMENT] => {
                let (name, chain) = label.rsplit_once('-').ok_or_else(unrecognized)?;
                CallbackPayload::PickRequirement {
                    name: name.to_string(),
                    chain: chain.to_string(),
                    requirement_id: requirement_id.parse().map_err(|_| unrecognized())?,
                }
            }
            ["yes", POLL_DESCRIPTION] => CallbackPayload::DescriptionChoice { add: true },
            ["no", POLL_DESCRIPTION] => CallbackPayload::DescriptionChoice { add: false },
            _ => return Err(unrecognized()),
        };
        Ok(payload)
    }
}

fn parse_poll_id(raw: &str) -> Option<PollId> {
    raw.parse().ok().map(PollId)
}

fn parse_message_ref(raw: &str) -> Option<MessageRef> {
    let (chat, message) = raw.split_once(':')?;
    Some(MessageRef::new(
        ChatId(chat.parse().ok()?),
        MessageId(message.parse().ok()?),
    ))
}
