use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64};
use std::time::{Duration, Instant};

use crate::poll::PollService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PollService>,
    pub start_time: Instant,
    pub last_update_id: Arc<AtomicU64>,
    /// Unix seconds of the last completed update poll, 0 before the first.
    pub last_poll_at: Arc<AtomicI64>,
    pub backend_timeout: Duration,
    pub staleness_threshold: Duration,
}

impl AppState {
    pub fn new(
        service: Arc<PollService>,
        last_update_id: Arc<AtomicU64>,
        last_poll_at: Arc<AtomicI64>,
        backend_timeout: Duration,
        staleness_threshold: Duration,
    ) -> Self {
        assert!(
            Arc::strong_count(&last_update_id) >= 1,
            "Poller state must be shared"
        );
        assert!(
            staleness_threshold >= Duration::from_secs(1),
            "Staleness threshold must be at least one second"
        );
        Self {
            service,
            start_time: Instant::now(),
            last_update_id,
            last_poll_at,
            backend_timeout,
            staleness_threshold,
        }
    }
}
