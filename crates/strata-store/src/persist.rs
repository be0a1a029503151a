//! Hash-sharded async persistence.
//!
//! Each shard owns one bounded MPSC channel and one consumer task. A
//! session always hashes to the same shard, so its writes are applied in
//! submission order while different sessions persist in parallel.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use strata_core::{Context, Event, Key, Result, SessionError, TrackEvent, murmur3_32, shard_index};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::store::SessionStore;

/// Time budget for a single persist job.
pub const PERSIST_JOB_TIMEOUT: Duration = Duration::from_secs(5);

/// Write queued on a shard.
#[derive(Debug)]
enum PersistJob {
    Event { key: Key, event: Event },
    Track { key: Key, event: TrackEvent },
}

impl PersistJob {
    fn key(&self) -> &Key {
        match self {
            Self::Event { key, .. } | Self::Track { key, .. } => key,
        }
    }
}

/// Routing hash for a job: the session hash for events, the session plus
/// track name for track events.
fn job_hash(job: &PersistJob) -> u32 {
    match job {
        PersistJob::Event { key, .. } => {
            strata_core::session_hash(&key.app_name, &key.user_id, &key.session_id)
        }
        PersistJob::Track { key, event } => murmur3_32(
            format!("{}:{}:{}:{}", key.app_name, key.user_id, key.session_id, event.track).as_bytes(),
            0,
        ),
    }
}

/// Sharded persist workers over a [`SessionStore`].
pub struct PersistPool {
    senders: RwLock<Vec<mpsc::Sender<PersistJob>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PersistPool {
    /// Spawn `workers` shards, each with a queue of `queue_size`.
    pub fn start(store: Arc<SessionStore>, workers: usize, queue_size: usize) -> Self {
        let workers = workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for shard in 0..workers {
            let (tx, rx) = mpsc::channel(queue_size.max(1));
            senders.push(tx);
            handles.push(tokio::spawn(persist_worker(shard, rx, Arc::clone(&store))));
        }
        debug!(workers, queue_size, "persist workers started");
        Self {
            senders: RwLock::new(senders),
            handles: Mutex::new(handles),
        }
    }

    /// Number of live shards (0 after close).
    pub fn shards(&self) -> usize {
        self.senders.read().len()
    }

    /// Queue an event write. Waits for queue space unless `ctx` finishes
    /// first, in which case nothing is queued.
    pub async fn enqueue_event(&self, ctx: &Context, key: &Key, event: Event) -> Result<()> {
        self.send(
            ctx,
            PersistJob::Event {
                key: key.clone(),
                event,
            },
        )
        .await
    }

    /// Queue a track event write.
    pub async fn enqueue_track_event(&self, ctx: &Context, key: &Key, event: TrackEvent) -> Result<()> {
        self.send(
            ctx,
            PersistJob::Track {
                key: key.clone(),
                event,
            },
        )
        .await
    }

    async fn send(&self, ctx: &Context, job: PersistJob) -> Result<()> {
        ctx.check()?;
        let tx = {
            let senders = self.senders.read();
            if senders.is_empty() {
                warn!(session = %job.key(), "persist pool closed, dropping job");
                return Err(SessionError::Closed);
            }
            senders[shard_index(job_hash(&job), senders.len())].clone()
        };
        tokio::select! {
            biased;
            reason = ctx.done() => Err(reason.into()),
            sent = tx.send(job) => sent.map_err(|_| {
                warn!("persist shard exited, dropping job");
                SessionError::Closed
            }),
        }
    }

    /// Stop accepting jobs, drain the queues, and wait for every worker.
    /// Later calls return immediately.
    pub async fn close(&self) {
        let senders = std::mem::take(&mut *self.senders.write());
        drop(senders);
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "persist worker panicked");
            }
        }
    }
}

async fn persist_worker(shard: usize, mut rx: mpsc::Receiver<PersistJob>, store: Arc<SessionStore>) {
    while let Some(job) = rx.recv().await {
        let ctx = Context::background().with_timeout(PERSIST_JOB_TIMEOUT);
        let result = match &job {
            PersistJob::Event { key, event } => store.add_event(&ctx, key, event),
            PersistJob::Track { key, event } => store.add_track_event(&ctx, key, event),
        };
        if let Err(e) = result {
            error!(shard, session = %job.key(), error = %e, "async persist failed");
        }
    }
    debug!(shard, "persist worker stopped");
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
