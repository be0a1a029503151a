//! Session service façade.
//!
//! [`SessionService`] validates inputs, keeps the caller's in-memory
//! [`Session`] in step with storage, runs the hook chains, and routes writes
//! either straight to the [`SessionStore`] or through the async persist
//! pool. State CRUD lives in [`state`], summaries in [`summary`].

mod state;
mod summary;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use strata_core::{Context, Event, Key, Options, Result, Session, SessionError, StateMap, TrackEvent, UserKey};
use strata_hooks::{AppendEventChain, AppendEventContext, GetSessionChain, GetSessionContext, Terminal};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cleanup::CleanupTask;
use crate::errors::WithOp;
use crate::options::ServiceOptions;
use crate::persist::PersistPool;
use crate::sqlite::client::StorageClient;
use crate::sqlite::connection::{AttachedDatabase, ConnectionPool, ConnectionTarget, schema_database_path};
use crate::sqlite::schema::{TableNames, init_schema, verify_schema};
use crate::store::SessionStore;
use crate::summary_pool::SummaryPool;

const OP_CONNECT: &str = "sqlite session service connect";
const OP_INIT_DB: &str = "sqlite session service init db";

/// `SQLite`-backed session service.
pub struct SessionService {
    store: Arc<SessionStore>,
    persist: Option<PersistPool>,
    summaries: Option<SummaryPool>,
    cleanup: Option<CleanupTask>,
    get_session_hooks: GetSessionChain,
    append_event_hooks: AppendEventChain,
    closed: AtomicBool,
}

/// Open the pool described by `opts` and resolve table names.
fn open_storage(opts: &ServiceOptions) -> Result<(ConnectionPool, TableNames)> {
    opts.validate()?;
    let prefix = opts.normalized_prefix()?;
    let target = ConnectionTarget::resolve(
        opts.dsn.as_deref(),
        opts.path.as_deref(),
        opts.instance_name.as_deref(),
    )
    .with_op(OP_CONNECT)?;

    let mut config = opts.connection_config();
    let schema = opts.schema.as_str();
    if !schema.is_empty() && schema != "main" {
        config.attach = Some(AttachedDatabase {
            name: schema.to_string(),
            path: schema_database_path(target.file_path().as_deref(), schema),
        });
    }
    let pool = target.open(&config).with_op(OP_CONNECT)?;
    Ok((pool, TableNames::new(schema, &prefix)))
}

/// Create or verify tables per `opts.skip_db_init`.
fn prepare_schema(pool: &ConnectionPool, names: &TableNames, skip_db_init: bool) -> Result<()> {
    let conn = pool
        .get()
        .map_err(crate::errors::StorageError::from)
        .with_op(OP_INIT_DB)?;
    if skip_db_init {
        let missing = verify_schema(&conn, names).with_op(OP_INIT_DB)?;
        if !missing.is_empty() {
            warn!(indexes = ?missing, "schema verified with missing indexes");
        }
        return Ok(());
    }
    init_schema(&conn, names).with_op(OP_INIT_DB)
}

/// Create every table and index described by `opts` without starting a
/// service. For deployments that manage the schema out of band.
pub fn init_db(opts: &ServiceOptions) -> Result<TableNames> {
    let (pool, names) = open_storage(opts)?;
    prepare_schema(&pool, &names, false)?;
    Ok(names)
}

impl SessionService {
    /// Connect, prepare the schema, and start the background workers.
    ///
    /// Must be called inside a Tokio runtime.
    pub async fn new(opts: ServiceOptions) -> Result<Self> {
        let (pool, names) = open_storage(&opts)?;
        prepare_schema(&pool, &names, opts.skip_db_init)?;

        let store = Arc::new(SessionStore::new(
            StorageClient::new(pool),
            names,
            opts.store_policy(),
            opts.summarizer.clone(),
        ));

        let persist = opts.enable_async_persist.then(|| {
            PersistPool::start(Arc::clone(&store), opts.async_persister_num, opts.persist_queue_size)
        });
        let summaries = (opts.summarizer.is_some() && opts.async_summary_num > 0).then(|| {
            SummaryPool::start(
                Arc::clone(&store),
                opts.async_summary_num,
                opts.summary_queue_size,
                opts.summary_job_timeout,
            )
        });
        let interval = opts.effective_cleanup_interval();
        let cleanup = (!interval.is_zero()).then(|| CleanupTask::start(Arc::clone(&store), interval));

        info!(
            tables = %store.tables().session_states,
            async_persist = persist.is_some(),
            async_summary = summaries.is_some(),
            cleanup_secs = interval.as_secs(),
            "session service ready"
        );
        Ok(Self {
            store,
            persist,
            summaries,
            cleanup,
            get_session_hooks: opts.get_session_hooks,
            append_event_hooks: opts.append_event_hooks,
            closed: AtomicBool::new(false),
        })
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the cleanup ticker, drain the persist and summary workers, and
    /// close the storage client. Only the first call does anything.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(cleanup) = &self.cleanup {
            cleanup.stop().await;
        }
        if let Some(persist) = &self.persist {
            persist.close().await;
        }
        if let Some(summaries) = &self.summaries {
            summaries.close().await;
        }
        let _ = self.store.client().close();
        info!("session service closed");
    }

    // ── Sessions ────────────────────────────────────────────────────────

    /// Create a session. An empty session id is replaced by a fresh UUID.
    pub async fn create_session(&self, ctx: &Context, key: &Key, state: &StateMap) -> Result<Arc<Session>> {
        self.ensure_open()?;
        key.check_user_key()?;
        let key = if key.session_id.is_empty() {
            Key::new(key.app_name.clone(), key.user_id.clone(), Uuid::new_v4().to_string())
        } else {
            key.clone()
        };
        let session = self.store.create_session(ctx, &key, state)?;
        Ok(Arc::new(session))
    }

    /// Load a session through the `get_session` hooks. `None` when it does
    /// not exist, was deleted, or has expired.
    pub async fn get_session(&self, ctx: &Context, key: &Key, opts: &Options) -> Result<Option<Arc<Session>>> {
        self.ensure_open()?;
        key.check_session_key()?;
        let store = &self.store;
        let terminal: &Terminal<'_, GetSessionContext, Option<Arc<Session>>> = &|c: GetSessionContext| {
            Box::pin(async move { Ok(store.load_session(&c.ctx, &c.key, &c.options)?.map(Arc::new)) })
        };
        self.get_session_hooks
            .run(
                GetSessionContext {
                    ctx: ctx.clone(),
                    key: key.clone(),
                    options: opts.clone(),
                },
                terminal,
            )
            .await
    }

    /// Every active session of `user`.
    pub async fn list_sessions(&self, ctx: &Context, user: &UserKey, opts: &Options) -> Result<Vec<Arc<Session>>> {
        self.ensure_open()?;
        Ok(self
            .store
            .list_sessions(ctx, user, opts)?
            .into_iter()
            .map(Arc::new)
            .collect())
    }

    /// Delete a session with its events, tracks, and summaries.
    pub async fn delete_session(&self, ctx: &Context, key: &Key) -> Result<()> {
        self.ensure_open()?;
        self.store.delete_session(ctx, key)
    }

    // ── Appends ─────────────────────────────────────────────────────────

    /// Run `event` through the `append_event` hooks. The innermost step
    /// applies it to `session` in memory and then persists it, so a hook
    /// that short-circuits leaves both untouched.
    pub async fn append_event(
        &self,
        ctx: &Context,
        session: &Arc<Session>,
        event: Event,
        opts: &Options,
    ) -> Result<()> {
        self.ensure_open()?;
        let key = session.key().clone();
        key.check_session_key()?;

        let terminal: &Terminal<'_, AppendEventContext, ()> = &|c: AppendEventContext| {
            Box::pin(async move {
                c.session.update_user_session(&c.event, opts);
                self.persist_event(&c.ctx, &c.key, c.event).await
            })
        };
        self.append_event_hooks
            .run(
                AppendEventContext {
                    ctx: ctx.clone(),
                    session: Arc::clone(session),
                    event,
                    key,
                },
                terminal,
            )
            .await
    }

    async fn persist_event(&self, ctx: &Context, key: &Key, event: Event) -> Result<()> {
        match &self.persist {
            Some(pool) => {
                debug!(session = %key, "queueing event");
                pool.enqueue_event(ctx, key, event).await
            }
            None => self.store.add_event(ctx, key, &event),
        }
    }

    /// Append a track event in memory and persist it.
    pub async fn append_track_event(
        &self,
        ctx: &Context,
        session: &Arc<Session>,
        event: TrackEvent,
    ) -> Result<()> {
        self.ensure_open()?;
        let key = session.key();
        key.check_session_key()?;
        if event.track.is_empty() {
            return Err(SessionError::InvalidArgument("track is required".into()));
        }
        session.append_track_event(event.clone())?;
        match &self.persist {
            Some(pool) => pool.enqueue_track_event(ctx, key, event).await,
            None => self.store.add_track_event(ctx, key, &event),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
