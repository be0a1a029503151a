//! Event repository: the append-only conversation log.
//!
//! Rows are ordered by `created_at` (insertion time) with ties broken by
//! the row id, so insertion order is read order.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use strata_core::time::format_ts;
use strata_core::{Event, Key};
use tracing::warn;

use crate::errors::Result;
use crate::sqlite::repositories::delete_session_rows;

/// Repository over `session_events`.
#[derive(Clone, Copy, Debug)]
pub struct EventRepo<'t> {
    table: &'t str,
}

impl<'t> EventRepo<'t> {
    /// Repository over the qualified `table`.
    pub fn new(table: &'t str) -> Self {
        Self { table }
    }

    /// Insert one event. Returns the row id.
    pub fn insert(&self, conn: &Connection, key: &Key, event: &Event, now: DateTime<Utc>) -> Result<i64> {
        let now = format_ts(now);
        let _ = conn.execute(
            &format!(
                "INSERT INTO {} (app_name, user_id, session_id, event, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                self.table
            ),
            params![
                key.app_name,
                key.user_id,
                key.session_id,
                serde_json::to_string(event)?,
                now
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Active events for `key` created strictly after `after`, newest
    /// `limit` (0 = all), returned oldest first. Undecodable rows are
    /// logged and skipped.
    pub fn list(
        &self,
        conn: &Connection,
        key: &Key,
        after: Option<DateTime<Utc>>,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        let limit = if limit == 0 { -1 } else { i64::try_from(limit).unwrap_or(i64::MAX) };
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT id, event FROM {}
             WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3 AND deleted_at IS NULL
               AND (expires_at IS NULL OR expires_at > ?4)
               AND (?5 IS NULL OR created_at > ?5)
             ORDER BY created_at DESC, id DESC
             LIMIT ?6",
            self.table
        ))?;
        let mut rows = stmt.query(params![
            key.app_name,
            key.user_id,
            key.session_id,
            format_ts(now),
            after.map(format_ts),
            limit
        ])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let raw: String = row.get(1)?;
            match serde_json::from_str::<Event>(&raw) {
                Ok(event) => events.push(event),
                Err(e) => warn!(session = %key, row_id = id, error = %e, "skipping undecodable event"),
            }
        }
        events.reverse();
        Ok(events)
    }

    /// Keep only the newest `keep` active events of the session, removing
    /// (or soft-deleting) the rest. Returns the number of rows evicted.
    pub fn enforce_limit(
        &self,
        conn: &Connection,
        key: &Key,
        keep: usize,
        soft: bool,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);
        let overflow = format!(
            "id IN (SELECT id FROM {table}
                    WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3 AND deleted_at IS NULL
                    ORDER BY created_at DESC, id DESC
                    LIMIT -1 OFFSET ?4)",
            table = self.table
        );
        let evicted = if soft {
            conn.execute(
                &format!("UPDATE {} SET deleted_at = ?5 WHERE {overflow}", self.table),
                params![key.app_name, key.user_id, key.session_id, keep, format_ts(now)],
            )?
        } else {
            conn.execute(
                &format!("DELETE FROM {} WHERE {overflow}", self.table),
                params![key.app_name, key.user_id, key.session_id, keep],
            )?
        };
        Ok(evicted)
    }

    /// Soft- or hard-delete every event of the session.
    pub fn delete(&self, conn: &Connection, key: &Key, soft: bool, now: DateTime<Utc>) -> Result<usize> {
        delete_session_rows(conn, self.table, key, soft, now)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
