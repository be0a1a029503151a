//! Repository implementations for `SQLite` database operations.
//!
//! Each repository is a small struct holding the fully-qualified table name
//! it targets; every method takes a `&Connection` (a transaction derefs to
//! one) and executes SQL. No shared mutable state.
//!
//! Timestamps are bound as parameters, never computed in SQL, so callers
//! control "now" and lexical comparison equals time comparison.

pub mod app_state;
pub mod event;
pub mod expiry;
pub mod session_state;
pub mod summary;
pub mod track;
pub mod user_state;

pub use app_state::AppStateRepo;
pub use event::EventRepo;
pub use expiry::ExpiryRepo;
pub use session_state::SessionStateRepo;
pub use summary::SummaryRepo;
pub use track::TrackRepo;
pub use user_state::UserStateRepo;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use strata_core::Key;
use strata_core::time::format_ts;

use crate::errors::Result;

/// Soft- or hard-delete every active row of `key` in a session-scoped table.
pub(crate) fn delete_session_rows(
    conn: &Connection,
    table: &str,
    key: &Key,
    soft: bool,
    now: DateTime<Utc>,
) -> Result<usize> {
    let changed = if soft {
        conn.execute(
            &format!(
                "UPDATE {table} SET deleted_at = ?4
                 WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3 AND deleted_at IS NULL"
            ),
            params![key.app_name, key.user_id, key.session_id, format_ts(now)],
        )?
    } else {
        conn.execute(
            &format!("DELETE FROM {table} WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3"),
            params![key.app_name, key.user_id, key.session_id],
        )?
    };
    Ok(changed)
}

// ─────────────────────────────────────────────────────────────────────────────
// Test helpers
// ─────────────────────────────────────────────────────────────────────────────
