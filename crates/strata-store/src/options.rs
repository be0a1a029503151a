//! Service construction options.
//!
//! [`ServiceOptions`] carries everything [`SessionService::new`] needs:
//! where the database lives, naming, lifecycle policy, worker sizing, and
//! the pluggable summarizer and hooks. Build it from loaded settings with
//! [`ServiceOptions::from_settings`] or directly with the `with_*` methods.
//!
//! [`SessionService::new`]: crate::SessionService::new

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use strata_core::{Result, SessionError};
use strata_hooks::{AppendEventChain, AppendEventHook, GetSessionChain, GetSessionHook};
use strata_settings::{StrataSettings, normalize_table_prefix, validate_schema};
use strata_summary::Summarizer;

use crate::sqlite::connection::ConnectionConfig;
use crate::store::StorePolicy;

const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Options for [`SessionService::new`](crate::SessionService::new).
#[derive(Clone)]
pub struct ServiceOptions {
    /// `:memory:`, a `file:` URI, or a plain path. Highest priority.
    pub dsn: Option<String>,
    /// Database file path.
    pub path: Option<String>,
    /// Name of a registered pool.
    pub instance_name: Option<String>,
    /// Attached schema database (`""` = main).
    pub schema: String,
    /// Table name prefix. Validated and completed with `_`.
    pub table_prefix: String,
    /// Skip table creation; verify the existing schema only.
    pub skip_db_init: bool,
    /// Pool size.
    pub pool_size: u32,
    /// `SQLite` busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
    /// Session TTL (zero = no expiry).
    pub session_ttl: Duration,
    /// App state TTL (zero = no expiry).
    pub app_state_ttl: Duration,
    /// User state TTL (zero = no expiry).
    pub user_state_ttl: Duration,
    /// Maximum active events per session (0 = unbounded).
    pub session_event_limit: usize,
    /// Mark rows deleted instead of removing them.
    pub soft_delete: bool,
    /// Sweep interval. `None` derives 5 minutes when any TTL is set.
    pub cleanup_interval: Option<Duration>,
    /// Persist appends on background shards.
    pub enable_async_persist: bool,
    /// Persistence shards.
    pub async_persister_num: usize,
    /// Queue capacity per persistence shard.
    pub persist_queue_size: usize,
    /// Summary shards (0 = synchronous summaries).
    pub async_summary_num: usize,
    /// Queue capacity per summary shard.
    pub summary_queue_size: usize,
    /// Per-job summary timeout.
    pub summary_job_timeout: Duration,
    /// Summarizer. Without one, summary operations are no-ops.
    pub summarizer: Option<Arc<dyn Summarizer>>,
    /// Hooks around `get_session`.
    pub get_session_hooks: GetSessionChain,
    /// Hooks around `append_event`.
    pub append_event_hooks: AppendEventChain,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            dsn: None,
            path: None,
            instance_name: None,
            schema: String::new(),
            table_prefix: String::new(),
            skip_db_init: false,
            pool_size: 16,
            busy_timeout_ms: 30_000,
            session_ttl: Duration::ZERO,
            app_state_ttl: Duration::ZERO,
            user_state_ttl: Duration::ZERO,
            session_event_limit: 1000,
            soft_delete: true,
            cleanup_interval: None,
            enable_async_persist: false,
            async_persister_num: 10,
            persist_queue_size: 100,
            async_summary_num: 3,
            summary_queue_size: 100,
            summary_job_timeout: Duration::from_secs(30),
            summarizer: None,
            get_session_hooks: GetSessionChain::new(),
            append_event_hooks: AppendEventChain::new(),
        }
    }
}

impl fmt::Debug for ServiceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceOptions")
            .field("dsn", &self.dsn)
            .field("path", &self.path)
            .field("instance_name", &self.instance_name)
            .field("schema", &self.schema)
            .field("table_prefix", &self.table_prefix)
            .field("session_ttl", &self.session_ttl)
            .field("session_event_limit", &self.session_event_limit)
            .field("soft_delete", &self.soft_delete)
            .field("enable_async_persist", &self.enable_async_persist)
            .field("async_summary_num", &self.async_summary_num)
            .field("summarizer", &self.summarizer.is_some())
            .field("get_session_hooks", &self.get_session_hooks.names())
            .field("append_event_hooks", &self.append_event_hooks.names())
            .finish_non_exhaustive()
    }
}

impl ServiceOptions {
    /// Options mirroring loaded settings. Hooks and the summarizer are
    /// attached afterwards with the builder methods.
    pub fn from_settings(settings: &StrataSettings) -> Self {
        let storage = &settings.storage;
        let session = &settings.session;
        let workers = &settings.workers;
        Self {
            dsn: storage.dsn.clone(),
            path: storage.path.clone(),
            instance_name: storage.instance_name.clone(),
            schema: storage.schema.clone(),
            table_prefix: storage.table_prefix.clone(),
            skip_db_init: storage.skip_db_init,
            pool_size: storage.pool_size,
            busy_timeout_ms: storage.busy_timeout_ms,
            session_ttl: session.session_ttl(),
            app_state_ttl: session.app_state_ttl(),
            user_state_ttl: session.user_state_ttl(),
            session_event_limit: session.session_event_limit,
            soft_delete: session.soft_delete,
            cleanup_interval: (session.cleanup_interval_secs > 0)
                .then(|| Duration::from_secs(session.cleanup_interval_secs)),
            enable_async_persist: workers.enable_async_persist,
            async_persister_num: workers.async_persister_num,
            persist_queue_size: workers.persist_queue_size,
            async_summary_num: workers.async_summary_num,
            summary_queue_size: workers.summary_queue_size,
            summary_job_timeout: workers.summary_job_timeout(),
            ..Self::default()
        }
    }

    /// Use a DSN.
    #[must_use]
    pub fn with_dsn(mut self, dsn: impl Into<String>) -> Self {
        self.dsn = Some(dsn.into());
        self
    }

    /// Use a database file.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Use a registered pool.
    #[must_use]
    pub fn with_instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = Some(name.into());
        self
    }

    /// Place tables in an attached schema database.
    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Prefix every table name.
    #[must_use]
    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    /// Skip DDL at startup.
    #[must_use]
    pub fn with_skip_db_init(mut self, skip: bool) -> Self {
        self.skip_db_init = skip;
        self
    }

    /// Session TTL.
    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// App state TTL.
    #[must_use]
    pub fn with_app_state_ttl(mut self, ttl: Duration) -> Self {
        self.app_state_ttl = ttl;
        self
    }

    /// User state TTL.
    #[must_use]
    pub fn with_user_state_ttl(mut self, ttl: Duration) -> Self {
        self.user_state_ttl = ttl;
        self
    }

    /// Event cap per session.
    #[must_use]
    pub fn with_session_event_limit(mut self, limit: usize) -> Self {
        self.session_event_limit = limit;
        self
    }

    /// Soft or hard deletes.
    #[must_use]
    pub fn with_soft_delete(mut self, soft: bool) -> Self {
        self.soft_delete = soft;
        self
    }

    /// Explicit sweep interval. Zero disables the sweep.
    #[must_use]
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Persist appends on `workers` background shards.
    #[must_use]
    pub fn with_async_persist(mut self, workers: usize) -> Self {
        self.enable_async_persist = workers > 0;
        if workers > 0 {
            self.async_persister_num = workers;
        }
        self
    }

    /// Persistence queue capacity.
    #[must_use]
    pub fn with_persist_queue_size(mut self, size: usize) -> Self {
        self.persist_queue_size = size;
        self
    }

    /// Summary shards (0 = synchronous).
    #[must_use]
    pub fn with_async_summary_num(mut self, workers: usize) -> Self {
        self.async_summary_num = workers;
        self
    }

    /// Summary queue capacity.
    #[must_use]
    pub fn with_summary_queue_size(mut self, size: usize) -> Self {
        self.summary_queue_size = size;
        self
    }

    /// Per-job summary timeout.
    #[must_use]
    pub fn with_summary_job_timeout(mut self, timeout: Duration) -> Self {
        self.summary_job_timeout = timeout;
        self
    }

    /// Attach a summarizer.
    #[must_use]
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Register a `get_session` hook.
    #[must_use]
    pub fn with_get_session_hook(mut self, hook: Arc<GetSessionHook>) -> Self {
        self.get_session_hooks.register(hook);
        self
    }

    /// Register an `append_event` hook.
    #[must_use]
    pub fn with_append_event_hook(mut self, hook: Arc<AppendEventHook>) -> Self {
        self.append_event_hooks.register(hook);
        self
    }

    /// Effective sweep interval.
    pub fn effective_cleanup_interval(&self) -> Duration {
        if let Some(interval) = self.cleanup_interval {
            return interval;
        }
        let any_ttl =
            !(self.session_ttl.is_zero() && self.app_state_ttl.is_zero() && self.user_state_ttl.is_zero());
        if any_ttl {
            DEFAULT_CLEANUP_INTERVAL
        } else {
            Duration::ZERO
        }
    }

    /// Validated table prefix (underscore-completed).
    pub fn normalized_prefix(&self) -> Result<String> {
        normalize_table_prefix(&self.table_prefix)
            .map_err(|e| SessionError::InvalidArgument(e.to_string()))
    }

    /// Check naming before anything touches the database.
    pub fn validate(&self) -> Result<()> {
        let _ = self.normalized_prefix()?;
        validate_schema(&self.schema).map_err(|e| SessionError::InvalidArgument(e.to_string()))
    }

    pub(crate) fn store_policy(&self) -> StorePolicy {
        StorePolicy {
            session_ttl: self.session_ttl,
            app_state_ttl: self.app_state_ttl,
            user_state_ttl: self.user_state_ttl,
            event_limit: self.session_event_limit,
            soft_delete: self.soft_delete,
        }
    }

    pub(crate) fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            pool_size: self.pool_size.max(1),
            busy_timeout_ms: self.busy_timeout_ms,
            ..ConnectionConfig::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::ErrorKind;

    #[test]
    fn from_settings_copies_every_section() {
        let mut settings = StrataSettings::default();
        settings.storage.path = Some("/tmp/s.db".into());
        settings.storage.table_prefix = "t".into();
        settings.session.session_ttl_secs = 60;
        settings.session.soft_delete = false;
        settings.workers.enable_async_persist = true;
        settings.workers.async_persister_num = 4;

        let opts = ServiceOptions::from_settings(&settings);
        assert_eq!(opts.path.as_deref(), Some("/tmp/s.db"));
        assert_eq!(opts.session_ttl, Duration::from_secs(60));
        assert!(!opts.soft_delete);
        assert!(opts.enable_async_persist);
        assert_eq!(opts.async_persister_num, 4);
        assert_eq!(opts.normalized_prefix().unwrap(), "t_");
        assert!(opts.cleanup_interval.is_none());
        assert_eq!(opts.effective_cleanup_interval(), DEFAULT_CLEANUP_INTERVAL);
    }

    #[test]
    fn cleanup_interval_is_off_without_ttls() {
        let opts = ServiceOptions::default();
        assert_eq!(opts.effective_cleanup_interval(), Duration::ZERO);
        let opts = opts.with_cleanup_interval(Duration::from_secs(10));
        assert_eq!(opts.effective_cleanup_interval(), Duration::from_secs(10));
    }

    #[test]
    fn invalid_names_fail_validation() {
        let bad_prefix = ServiceOptions::default().with_table_prefix("a;drop");
        assert_eq!(bad_prefix.validate().unwrap_err().kind(), ErrorKind::InvalidArgument);
        let bad_schema = ServiceOptions::default().with_schema("1abc");
        assert_eq!(bad_schema.validate().unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert!(ServiceOptions::default().with_schema("audit").validate().is_ok());
    }

    #[test]
    fn async_persist_toggle() {
        let opts = ServiceOptions::default().with_async_persist(3);
        assert!(opts.enable_async_persist);
        assert_eq!(opts.async_persister_num, 3);
        assert!(!ServiceOptions::default().with_async_persist(0).enable_async_persist);
    }
}
