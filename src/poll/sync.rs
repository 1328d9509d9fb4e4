use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use tracing::{debug, warn};

use super::render::{admin_keyboard, unescape_markdown, vote_keyboard};
use crate::config::SyncConfig;
use crate::models::poll::PublishedPoll;
use crate::platform::{ChatPlatform, Keyboard, MessageRef};

/// The public voting message and the admin control message of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayBinding {
    pub public: MessageRef,
    pub admin: MessageRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Unchanged,
    Edited,
    /// A render based on a newer tally was already applied.
    Stale,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub public: EditOutcome,
    pub admin: EditOutcome,
}

/// Hands out monotonic sequence numbers for tally fetches and remembers the
/// newest sequence applied to each message.
pub struct SyncLedger {
    next: AtomicU64,
    applied: Cache<MessageRef, u64>,
}

impl SyncLedger {
    pub fn new(config: &SyncConfig) -> Self {
        assert!(config.max_capacity > 0, "Sync ledger capacity must be positive");
        let applied = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(Duration::from_secs(config.ttl_seconds))
            .build();
        Self {
            next: AtomicU64::new(0),
            applied,
        }
    }

    /// Call right before fetching a tally.
    pub fn begin(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn try_apply(&self, message: MessageRef, sequence: u64) -> bool {
        if self
            .applied
            .get(&message)
            .is_some_and(|last| last > sequence)
        {
            return false;
        }
        self.applied.insert(message, sequence);
        true
    }
}

pub struct MessageSynchronizer {
    platform: Arc<dyn ChatPlatform>,
    ledger: SyncLedger,
}

impl MessageSynchronizer {
    pub fn new(platform: Arc<dyn ChatPlatform>, ledger: SyncLedger) -> Self {
        Self { platform, ledger }
    }

    pub fn ledger(&self) -> &SyncLedger {
        &self.ledger
    }

    /// Brings both bound messages to `rendered`. An open poll whose displayed
    /// text already matches is left alone. An expired poll is always edited,
    /// since its messages may still carry buttons from before the deadline.
    pub async fn synchronize(
        &self,
        poll: &PublishedPoll,
        binding: DisplayBinding,
        displayed: &str,
        rendered: &str,
        sequence: u64,
        now: DateTime<Utc>,
    ) -> SyncReport {
        let expired = poll.content.has_expired(now);
        if !expired && is_unchanged(displayed, rendered) {
            debug!(poll_id = %poll.id, "Poll text unchanged, skipping edits");
            return SyncReport {
                public: EditOutcome::Unchanged,
                admin: EditOutcome::Unchanged,
            };
        }

        let (public_keyboard, admin_keyboard) = if expired {
            (None, None)
        } else {
            (
                Some(vote_keyboard(poll.id, &poll.content.options, binding.admin)),
                Some(admin_keyboard(poll.id, binding.public)),
            )
        };

        let (public, admin) = tokio::join!(
            self.edit(binding.public, rendered, public_keyboard.as_ref(), sequence),
            self.edit(binding.admin, rendered, admin_keyboard.as_ref(), sequence),
        );
        SyncReport { public, admin }
    }

    async fn edit(
        &self,
        message: MessageRef,
        text: &str,
        keyboard: Option<&Keyboard>,
        sequence: u64,
    ) -> EditOutcome {
        if !self.ledger.try_apply(message, sequence) {
            debug!(message = %message, sequence, "Dropping stale poll render");
            return EditOutcome::Stale;
        }
        match self.platform.edit_message_text(message, text, keyboard).await {
            Ok(()) => EditOutcome::Edited,
            Err(err) => {
                warn!(message = %message, "Couldn't update poll message: {err}");
                EditOutcome::Failed
            }
        }
    }
}

/// The platform hands back displayed text without markup, so escapes, bold
/// markers and surrounding whitespace are ignored.
pub fn is_unchanged(displayed: &str, rendered: &str) -> bool {
    strip_markup(displayed) == strip_markup(&unescape_markdown(rendered))
}

fn strip_markup(text: &str) -> String {
    text.trim().chars().filter(|c| *c != '*').collect()
}
