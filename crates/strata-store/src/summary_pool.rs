//! Hash-sharded async summary workers.
//!
//! Jobs for one session land on one shard, so a session never has two
//! summarizer calls in flight. Enqueueing never blocks: a full or closed
//! queue degrades to summarizing on the caller's task.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use strata_core::{Context, Key, Result, SUMMARY_FILTER_KEY_ALL_CONTENTS, Session, session_hash, shard_index};
use strata_summary::{copy_summary_to_key, is_single_filter_key};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::store::SessionStore;

/// One summary request.
#[derive(Clone, Debug)]
pub struct SummaryJob {
    /// Session the summary belongs to.
    pub key: Key,
    /// Branch to summarize (`""` = full session).
    pub filter_key: String,
    /// Bypass the delta and `should_summarize` gates.
    pub force: bool,
    /// In-memory session to summarize. Jobs without one are skipped.
    pub session: Option<Arc<Session>>,
}

impl SummaryJob {
    /// Job for `session` and `filter_key`.
    pub fn new(session: Arc<Session>, filter_key: impl Into<String>, force: bool) -> Self {
        Self {
            key: session.key().clone(),
            filter_key: filter_key.into(),
            force,
            session: Some(session),
        }
    }

    /// The follow-up full-session job after a branch summary.
    fn full_session(&self) -> Self {
        Self {
            key: self.key.clone(),
            filter_key: SUMMARY_FILTER_KEY_ALL_CONTENTS.to_string(),
            force: self.force,
            session: self.session.clone(),
        }
    }
}

/// Sharded summary workers over a [`SessionStore`].
pub struct SummaryPool {
    store: Arc<SessionStore>,
    senders: RwLock<Vec<mpsc::Sender<SummaryJob>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SummaryPool {
    /// Spawn `workers` shards with queues of `queue_size`. A zero
    /// `job_timeout` leaves jobs unbounded.
    pub fn start(store: Arc<SessionStore>, workers: usize, queue_size: usize, job_timeout: Duration) -> Self {
        let workers = workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for shard in 0..workers {
            let (tx, rx) = mpsc::channel(queue_size.max(1));
            senders.push(tx);
            handles.push(tokio::spawn(summary_worker(shard, rx, Arc::clone(&store), job_timeout)));
        }
        debug!(workers, queue_size, timeout_secs = job_timeout.as_secs(), "summary workers started");
        Self {
            store,
            senders: RwLock::new(senders),
            handles: Mutex::new(handles),
        }
    }

    /// Number of live shards (0 after close).
    pub fn shards(&self) -> usize {
        self.senders.read().len()
    }

    /// Queue `job` on its session's shard. When the queue is full or the
    /// pool is closed the job runs synchronously instead.
    pub async fn enqueue(&self, ctx: &Context, job: SummaryJob) -> Result<()> {
        ctx.check()?;
        let tx = {
            let senders = self.senders.read();
            if senders.is_empty() {
                None
            } else {
                let hash = session_hash(&job.key.app_name, &job.key.user_id, &job.key.session_id);
                Some(senders[shard_index(hash, senders.len())].clone())
            }
        };
        let job = match tx {
            Some(tx) => match tx.try_send(job) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(job)) => {
                    warn!(session = %job.key, filter_key = %job.filter_key, "summary queue full, summarizing synchronously");
                    job
                }
                Err(TrySendError::Closed(job)) => {
                    warn!(session = %job.key, "summary shard closed, summarizing synchronously");
                    job
                }
            },
            None => {
                warn!(session = %job.key, "summary pool closed, summarizing synchronously");
                job
            }
        };
        let Some(session) = job.session else {
            warn!(session = %job.key, "summary job without session, skipping");
            return Ok(());
        };
        self.store
            .create_session_summary(ctx, &session, &job.filter_key, job.force)
            .await
    }

    /// Stop accepting jobs, let queued ones finish, and wait for the
    /// workers. Later calls return immediately.
    pub async fn close(&self) {
        drop(std::mem::take(&mut *self.senders.write()));
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "summary worker panicked");
            }
        }
    }
}

async fn summary_worker(
    shard: usize,
    mut rx: mpsc::Receiver<SummaryJob>,
    store: Arc<SessionStore>,
    job_timeout: Duration,
) {
    while let Some(job) = rx.recv().await {
        run_job(shard, &store, &job, job_timeout).await;
        if job.filter_key == SUMMARY_FILTER_KEY_ALL_CONTENTS {
            continue;
        }
        if let Some(session) = &job.session {
            if is_single_filter_key(session, &job.filter_key) {
                copy_summary_to_key(session, &job.filter_key, SUMMARY_FILTER_KEY_ALL_CONTENTS);
            }
        }
        run_job(shard, &store, &job.full_session(), job_timeout).await;
    }
    debug!(shard, "summary worker stopped");
}

/// Run one job on its own task so a panicking summarizer only loses that
/// job.
async fn run_job(shard: usize, store: &Arc<SessionStore>, job: &SummaryJob, job_timeout: Duration) {
    let Some(session) = job.session.clone() else {
        warn!(shard, session = %job.key, "summary job without session, skipping");
        return;
    };
    let ctx = if job_timeout.is_zero() {
        Context::background()
    } else {
        Context::background().with_timeout(job_timeout)
    };
    let store = Arc::clone(store);
    let filter_key = job.filter_key.clone();
    let force = job.force;
    let task_ctx = ctx.clone();
    let handle = tokio::spawn(async move {
        store
            .create_session_summary(&task_ctx, &session, &filter_key, force)
            .await
    });
    let abort = handle.abort_handle();
    match ctx.run(handle).await {
        Ok(Ok(Ok(()))) => debug!(shard, session = %job.key, filter_key = %job.filter_key, "summary job done"),
        Ok(Ok(Err(e))) => {
            error!(shard, session = %job.key, filter_key = %job.filter_key, error = %e, "summary job failed");
        }
        Ok(Err(e)) => {
            error!(shard, session = %job.key, filter_key = %job.filter_key, error = %e, "summary job panicked");
        }
        Err(reason) => {
            abort.abort();
            warn!(shard, session = %job.key, filter_key = %job.filter_key, error = %reason, "summary job abandoned");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
