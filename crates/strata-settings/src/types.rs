//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a settings file may specify any subset of fields.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Default cleanup interval when any TTL is configured.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Root settings type.
///
/// ```json
/// {
///   "storage": { "path": "/var/lib/strata/sessions.db", "tablePrefix": "agent" },
///   "session": { "sessionTtlSecs": 3600, "sessionEventLimit": 500 },
///   "workers": { "enableAsyncPersist": true }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StrataSettings {
    /// Database location and schema naming.
    pub storage: StorageSettings,
    /// TTL, deletion, and event-cap policy.
    pub session: SessionSettings,
    /// Async persistence and summary pools.
    pub workers: WorkerSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl StrataSettings {
    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let _ = normalize_table_prefix(&self.storage.table_prefix)?;
        validate_schema(&self.storage.schema)?;
        if self.workers.enable_async_persist && self.workers.async_persister_num == 0 {
            return Err(SettingsError::InvalidValue(
                "asyncPersisterNum must be positive when async persist is enabled".into(),
            ));
        }
        Ok(())
    }
}

/// Storage connection and naming.
///
/// Connection resolution: `dsn` wins over `path`, which wins over
/// `instanceName`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// `SQLite` path or `file:` URI.
    pub dsn: Option<String>,
    /// Database file path.
    pub path: Option<String>,
    /// Name of a pre-registered connection pool.
    pub instance_name: Option<String>,
    /// Attached database name qualifying tables (empty = `main`).
    pub schema: String,
    /// Table name prefix (underscore appended if missing).
    pub table_prefix: String,
    /// Skip table creation and verification.
    pub skip_db_init: bool,
    /// Maximum pool size.
    pub pool_size: u32,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for StorageSettings {
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
        }
    }
}

/// Session lifecycle policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Session TTL in seconds (0 = no expiry).
    pub session_ttl_secs: u64,
    /// App state TTL in seconds (0 = no expiry).
    pub app_state_ttl_secs: u64,
    /// User state TTL in seconds (0 = no expiry).
    pub user_state_ttl_secs: u64,
    /// Maximum active events per session (0 = unbounded).
    pub session_event_limit: usize,
    /// Mark rows deleted instead of removing them.
    pub soft_delete: bool,
    /// Cleanup sweep interval in seconds (0 = derive from TTLs).
    pub cleanup_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            session_ttl_secs: 0,
            app_state_ttl_secs: 0,
            user_state_ttl_secs: 0,
            session_event_limit: 1000,
            soft_delete: true,
            cleanup_interval_secs: 0,
        }
    }
}

impl SessionSettings {
    /// Session TTL.
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// App state TTL.
    pub fn app_state_ttl(&self) -> Duration {
        Duration::from_secs(self.app_state_ttl_secs)
    }

    /// User state TTL.
    pub fn user_state_ttl(&self) -> Duration {
        Duration::from_secs(self.user_state_ttl_secs)
    }

    /// Cleanup interval: explicit value, else 5 minutes when any TTL is set,
    /// else disabled (zero).
    pub fn cleanup_interval(&self) -> Duration {
        if self.cleanup_interval_secs > 0 {
            return Duration::from_secs(self.cleanup_interval_secs);
        }
        let any_ttl =
            self.session_ttl_secs > 0 || self.app_state_ttl_secs > 0 || self.user_state_ttl_secs > 0;
        if any_ttl {
            DEFAULT_CLEANUP_INTERVAL
        } else {
            Duration::ZERO
        }
    }
}

/// Worker pool sizing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerSettings {
    /// Persist appends on background shards.
    pub enable_async_persist: bool,
    /// Number of persistence shards.
    pub async_persister_num: usize,
    /// Channel capacity per persistence shard.
    pub persist_queue_size: usize,
    /// Number of summary shards (0 = synchronous summaries).
    pub async_summary_num: usize,
    /// Channel capacity per summary shard.
    pub summary_queue_size: usize,
    /// Per-job summary timeout in seconds.
    pub summary_job_timeout_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            enable_async_persist: false,
            async_persister_num: 10,
            persist_queue_size: 100,
            async_summary_num: 3,
            summary_queue_size: 100,
            summary_job_timeout_secs: 30,
        }
    }
}

impl WorkerSettings {
    /// Per-job summary timeout.
    pub fn summary_job_timeout(&self) -> Duration {
        Duration::from_secs(self.summary_job_timeout_secs)
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ── Naming validation ───────────────────────────────────────────────────────

fn prefix_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid regex"))
}

fn schema_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"))
}

/// Validate a table prefix and append a trailing underscore if missing.
///
/// An empty prefix is returned unchanged.
pub fn normalize_table_prefix(prefix: &str) -> Result<String> {
    if prefix.is_empty() {
        return Ok(String::new());
    }
    if !prefix_pattern().is_match(prefix) {
        return Err(SettingsError::InvalidValue(format!(
            "table prefix {prefix:?} must match [A-Za-z0-9_]+"
        )));
    }
    if prefix.ends_with('_') {
        Ok(prefix.to_string())
    } else {
        Ok(format!("{prefix}_"))
    }
}

/// Validate a schema (attached database) name. Empty is allowed.
pub fn validate_schema(schema: &str) -> Result<()> {
    if schema.is_empty() || schema_pattern().is_match(schema) {
        return Ok(());
    }
    Err(SettingsError::InvalidValue(format!(
        "schema {schema:?} is not a valid identifier"
    )))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
