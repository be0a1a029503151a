//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`StrataSettings::default()`]
//! 2. If `~/.strata/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `STRATA_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)
//!
//! Naming validation (table prefix, schema) happens when a store is built
//! from the settings, not here.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::StrataSettings;

/// Resolve the path to the settings file (`~/.strata/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".strata").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<StrataSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<StrataSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<StrataSettings> {
    let defaults = serde_json::to_value(StrataSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are logged and ignored (fall back to file/default)
pub fn apply_env_overrides(settings: &mut StrataSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
fn apply_overrides(settings: &mut StrataSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Storage ─────────────────────────────────────────────────────
    if let Some(v) = env.string("STRATA_DSN") {
        settings.storage.dsn = Some(v);
    }
    if let Some(v) = env.string("STRATA_DB_PATH") {
        settings.storage.path = Some(v);
    }
    if let Some(v) = env.string("STRATA_INSTANCE_NAME") {
        settings.storage.instance_name = Some(v);
    }
    if let Some(v) = env.string("STRATA_SCHEMA") {
        settings.storage.schema = v;
    }
    if let Some(v) = env.string("STRATA_TABLE_PREFIX") {
        settings.storage.table_prefix = v;
    }
    if let Some(v) = env.bool("STRATA_SKIP_DB_INIT") {
        settings.storage.skip_db_init = v;
    }
    if let Some(v) = env
        .u64("STRATA_POOL_SIZE", 1, 1024)
        .and_then(|v| u32::try_from(v).ok())
    {
        settings.storage.pool_size = v;
    }

    // ── Session policy ──────────────────────────────────────────────
    if let Some(v) = env.u64("STRATA_SESSION_TTL_SECS", 0, u64::from(u32::MAX)) {
        settings.session.session_ttl_secs = v;
    }
    if let Some(v) = env.u64("STRATA_APP_STATE_TTL_SECS", 0, u64::from(u32::MAX)) {
        settings.session.app_state_ttl_secs = v;
    }
    if let Some(v) = env.u64("STRATA_USER_STATE_TTL_SECS", 0, u64::from(u32::MAX)) {
        settings.session.user_state_ttl_secs = v;
    }
    if let Some(v) = env.usize("STRATA_EVENT_LIMIT", 0, 1_000_000) {
        settings.session.session_event_limit = v;
    }
    if let Some(v) = env.bool("STRATA_SOFT_DELETE") {
        settings.session.soft_delete = v;
    }
    if let Some(v) = env.u64("STRATA_CLEANUP_INTERVAL_SECS", 0, 86_400) {
        settings.session.cleanup_interval_secs = v;
    }

    // ── Workers ─────────────────────────────────────────────────────
    if let Some(v) = env.bool("STRATA_ASYNC_PERSIST") {
        settings.workers.enable_async_persist = v;
    }
    if let Some(v) = env.usize("STRATA_ASYNC_PERSISTER_NUM", 1, 1024) {
        settings.workers.async_persister_num = v;
    }
    if let Some(v) = env.usize("STRATA_ASYNC_SUMMARY_NUM", 0, 1024) {
        settings.workers.async_summary_num = v;
    }
    if let Some(v) = env.u64("STRATA_SUMMARY_JOB_TIMEOUT_SECS", 1, 3600) {
        settings.workers.summary_job_timeout_secs = v;
    }
    if let Some(v) = env.usize("STRATA_PERSIST_QUEUE_SIZE", 1, 100_000) {
        settings.workers.persist_queue_size = v;
    }
    if let Some(v) = env.usize("STRATA_SUMMARY_QUEUE_SIZE", 1, 100_000) {
        settings.workers.summary_queue_size = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("STRATA_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("STRATA_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
