use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering as AtomicOrdering};

use anyhow::Result;
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::BotRouter;
use crate::config::TelegramConfig;
use crate::platform::telegram::{TelegramClient, Update};

/// Long-polls Telegram and hands every update to its own task, so a slow
/// backend call never holds up intake.
pub struct UpdatePoller {
    client: TelegramClient,
    router: Arc<BotRouter>,
    config: TelegramConfig,
    last_update_id: Arc<AtomicU64>,
    last_poll_at: Arc<AtomicI64>,
}

impl UpdatePoller {
    pub fn new(
        client: TelegramClient,
        router: Arc<BotRouter>,
        config: TelegramConfig,
        last_update_id: Arc<AtomicU64>,
        last_poll_at: Arc<AtomicI64>,
    ) -> Self {
        assert!(
            config.long_poll_seconds <= 50,
            "Long poll window must stay below Telegram's limit"
        );
        Self {
            client,
            router,
            config,
            last_update_id,
            last_poll_at,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("Starting Telegram update poller");
        let mut offset: i64 = 0;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    match changed {
                        Ok(_) => {
                            if *shutdown.borrow() {
                                info!("Poller shutdown signal received");
                                break;
                            }
                        }
                        Err(_) => {
                            warn!("Shutdown channel closed unexpectedly. Exiting poller loop");
                            break;
                        }
                    }
                }
                polled = self.client.get_updates(offset, self.config.long_poll()) => {
                    match polled {
                        Ok(updates) => {
                            self.last_poll_at.store(Utc::now().timestamp(), AtomicOrdering::SeqCst);
                            offset = self.dispatch(offset, updates);
                        }
                        Err(err) => {
                            warn!("Fetching updates failed: {err}");
                            sleep(self.config.retry_delay()).await;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn dispatch(&self, offset: i64, updates: Vec<Update>) -> i64 {
        let next = next_offset(offset, &updates);
        if !updates.is_empty() {
            debug!(count = updates.len(), next_offset = next, "Updates received");
        }
        for update in updates {
            let update_id = u64::try_from(update.update_id).unwrap_or_default();
            self.last_update_id.fetch_max(update_id, AtomicOrdering::SeqCst);
            let router = Arc::clone(&self.router);
            tokio::spawn(async move {
                router.handle_update(update).await;
            });
        }
        next
    }
}

/// Offset acknowledging every update in the batch.
fn next_offset(current: i64, updates: &[Update]) -> i64 {
    updates
        .iter()
        .map(|update| update.update_id + 1)
        .max()
        .map_or(current, |next| next.max(current))
}
