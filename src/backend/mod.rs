use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::models::guild::{Guild, GuildRef};
use crate::models::poll::{
    CreatePollRequest, PollId, PollResult, PollVoters, PublishedPoll, VoteRequest,
};
use crate::platform::{ChatId, UserId};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend request timed out")]
    Timeout,
    #[error("backend request failed: {0}")]
    Transport(reqwest::Error),
    #[error("backend rejected request with {status}: {message}")]
    Rejected { status: StatusCode, message: String },
    #[error("backend returned an undecodable body: {0}")]
    Decode(String),
}

impl BackendError {
    /// Message supplied by the backend itself, if it gave one.
    pub fn backend_message(&self) -> Option<&str> {
        match self {
            BackendError::Rejected { message, .. } => Some(message.as_str()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Transport(err)
        }
    }
}

/// Authorization backend operations the poll engine depends on.
#[async_trait]
pub trait PollBackend: Send + Sync {
    async fn guild(&self, guild_id: u64) -> Result<Option<Guild>, BackendError>;

    async fn guild_by_platform_id(&self, chat: ChatId) -> Result<Option<GuildRef>, BackendError>;

    async fn is_admin(&self, chat: ChatId, user: UserId) -> Result<bool, BackendError>;

    async fn create_poll(&self, request: &CreatePollRequest)
    -> Result<PublishedPoll, BackendError>;

    async fn poll(&self, poll_id: PollId) -> Result<Option<PublishedPoll>, BackendError>;

    async fn poll_result(&self, poll_id: PollId) -> Result<PollResult, BackendError>;

    async fn poll_voters(&self, poll_id: PollId) -> Result<PollVoters, BackendError>;

    async fn vote(&self, request: &VoteRequest) -> Result<(), BackendError>;
}

#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    poll_creation_timeout: Duration,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration, poll_creation_timeout: Duration) -> Result<Self> {
        assert!(!base_url.is_empty(), "Backend url must be provided");
        assert!(
            timeout >= Duration::from_millis(100),
            "Timeout below 100ms is unsafe"
        );
        assert!(
            poll_creation_timeout >= timeout,
            "Poll creation timeout must not be shorter than the default timeout"
        );

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .with_context(|| format!("Failed to build backend client for {base_url}"))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            poll_creation_timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn url(&self, path: &str) -> String {
        assert!(path.starts_with('/'), "Backend paths are absolute");
        format!("{}{path}", self.base_url)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, BackendError> {
        let response = checked(request.send().await?).await?;
        Ok(response.json::<T>().await?)
    }

    async fn fetch_optional<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Option<T>, BackendError> {
        let response = request.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = checked(response).await?.text().await?;
        if body.trim().is_empty() || body.trim() == "null" {
            return Ok(None);
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|err| BackendError::Decode(err.to_string()))
    }
}

#[async_trait]
impl PollBackend for BackendClient {
    async fn guild(&self, guild_id: u64) -> Result<Option<Guild>, BackendError> {
        let request = self.http.get(self.url(&format!("/guild/{guild_id}")));
        self.fetch_optional(request).await
    }

    async fn guild_by_platform_id(&self, chat: ChatId) -> Result<Option<GuildRef>, BackendError> {
        let request = self
            .http
            .get(self.url(&format!("/guild/platformId/{chat}")));
        self.fetch_optional(request).await
    }

    async fn is_admin(&self, chat: ChatId, user: UserId) -> Result<bool, BackendError> {
        let request = self
            .http
            .get(self.url(&format!("/guild/isAdmin/{chat}/{user}")));
        self.fetch(request).await
    }

    async fn create_poll(
        &self,
        request: &CreatePollRequest,
    ) -> Result<PublishedPoll, BackendError> {
        debug!(
            platform_id = %request.platform_id,
            options = request.options.len(),
            "Submitting poll to backend"
        );
        let builder = self
            .http
            .post(self.url("/poll"))
            .timeout(self.poll_creation_timeout)
            .json(request);
        self.fetch(builder).await
    }

    async fn poll(&self, poll_id: PollId) -> Result<Option<PublishedPoll>, BackendError> {
        let request = self.http.get(self.url(&format!("/poll/{poll_id}")));
        self.fetch_optional(request).await
    }

    async fn poll_result(&self, poll_id: PollId) -> Result<PollResult, BackendError> {
        let request = self.http.get(self.url(&format!("/poll/result/{poll_id}")));
        self.fetch(request).await
    }

    async fn poll_voters(&self, poll_id: PollId) -> Result<PollVoters, BackendError> {
        let request = self.http.get(self.url(&format!("/poll/voters/{poll_id}")));
        self.fetch(request).await
    }

    async fn vote(&self, request: &VoteRequest) -> Result<(), BackendError> {
        let builder = self.http.post(self.url("/poll/vote")).json(request);
        checked(builder.send().await?).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    msg: String,
}

/// Maps non-success statuses to [`BackendError::Rejected`], keeping the
/// first `errors[].msg` the backend sent along.
async fn checked(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Rejected {
        status,
        message: extract_error_message(&body),
    })
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.errors.into_iter().next())
        .map(|entry| entry.msg)
        .unwrap_or_else(|| body.trim().to_string())
}
