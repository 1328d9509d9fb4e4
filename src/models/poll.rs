use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::platform::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PollId(pub u64);

impl fmt::Display for PollId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token a poll is weighted by, as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Weighting {
    pub name: String,
    pub chain: String,
}

/// The displayable part of a poll, shared by drafts and published polls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollContent {
    pub question: String,
    #[serde(default)]
    pub description: Option<String>,
    pub options: Vec<String>,
    #[serde(rename = "expDate", with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
    #[serde(default, rename = "requirement")]
    pub weighting: Option<Weighting>,
}

impl PollContent {
    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedPoll {
    pub id: PollId,
    #[serde(default)]
    pub requirement_id: u64,
    #[serde(flatten)]
    pub content: PollContent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollRequest {
    pub platform: String,
    pub platform_id: String,
    pub requirement_id: u64,
    pub question: String,
    pub description: Option<String>,
    pub options: Vec<String>,
    pub start_date: i64,
    pub exp_date: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub platform: String,
    pub poll_id: PollId,
    pub voter_id: UserId,
    pub option_index: usize,
}

/// Aggregate weight per option text, as returned by `GET /poll/result/{id}`.
pub type PollResult = HashMap<String, f64>;

/// Voters per option text, as returned by `GET /poll/voters/{id}`.
pub type PollVoters = HashMap<String, Vec<VoterWeight>>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VoterWeight {
    #[serde(
        alias = "voterId",
        alias = "tgId",
        alias = "platformUserId",
        deserialize_with = "user_id_from_string_or_number"
    )]
    pub voter_id: UserId,
    #[serde(alias = "balance", default)]
    pub weight: f64,
}

/// Per-option weight and voter count, indexed like the poll options.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteTally {
    pub weights: Vec<f64>,
    pub voters: Vec<u64>,
    distinct_voters: u64,
}

impl VoteTally {
    pub fn empty(option_count: usize) -> Self {
        Self {
            weights: vec![0.0; option_count],
            voters: vec![0; option_count],
            distinct_voters: 0,
        }
    }

    /// Re-indexes the backend's option-keyed payloads by option order.
    /// Options the backend does not mention count as zero.
    pub fn from_backend(options: &[String], result: &PollResult, voters: &PollVoters) -> Self {
        let weights = options
            .iter()
            .map(|option| result.get(option).copied().unwrap_or(0.0).max(0.0))
            .collect();
        let per_option = options
            .iter()
            .map(|option| voters.get(option).map_or(0, |list| list.len() as u64))
            .collect();
        let distinct: HashSet<UserId> = options
            .iter()
            .filter_map(|option| voters.get(option))
            .flat_map(|list| list.iter().map(|voter| voter.voter_id))
            .collect();

        Self {
            weights,
            voters: per_option,
            distinct_voters: distinct.len() as u64,
        }
    }

    pub fn total_weight(&self) -> f64 {
        self.weights.iter().sum()
    }

    pub fn distinct_voters(&self) -> u64 {
        self.distinct_voters
    }
}

fn user_id_from_string_or_number<'de, D>(deserializer: D) -> Result<UserId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(value) => Ok(UserId(value)),
        Raw::Text(value) => value
            .trim()
            .parse::<i64>()
            .map(UserId)
            .map_err(serde::de::Error::custom),
    }
}
