//! Periodic TTL sweep.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use strata_core::Context;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::store::SessionStore;

/// Background task running [`SessionStore::cleanup_expired`] on a fixed
/// interval until stopped.
pub struct CleanupTask {
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CleanupTask {
    /// Start sweeping every `interval`. The first sweep runs one interval
    /// after start.
    pub fn start(store: Arc<SessionStore>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_cleanup(store, interval, cancel.clone()));
        info!(interval_secs = interval.as_secs(), "ttl cleanup started");
        Self {
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the ticker and wait for an in-flight sweep. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "ttl cleanup task panicked");
            }
            debug!("ttl cleanup stopped");
        }
    }
}

async fn run_cleanup(store: Arc<SessionStore>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if let Err(e) = store.cleanup_expired(&Context::background(), None) {
                    error!(error = %e, "ttl cleanup failed");
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
