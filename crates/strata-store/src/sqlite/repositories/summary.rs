//! Summary repository: one active row per `(session, filter_key)`.
//!
//! Summaries never expire on their own; they are removed with their
//! session.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use strata_core::time::format_ts;
use strata_core::{Key, Summary};
use tracing::warn;

use crate::errors::Result;
use crate::sqlite::repositories::delete_session_rows;

/// Repository over `session_summaries`.
#[derive(Clone, Copy, Debug)]
pub struct SummaryRepo<'t> {
    table: &'t str,
}

impl<'t> SummaryRepo<'t> {
    /// Repository over the qualified `table`.
    pub fn new(table: &'t str) -> Self {
        Self { table }
    }

    /// Insert or replace the active summary for `filter_key`.
    pub fn upsert(
        &self,
        conn: &Connection,
        key: &Key,
        filter_key: &str,
        summary: &Summary,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let _ = conn.execute(
            &format!(
                "INSERT INTO {} (app_name, user_id, session_id, filter_key, summary, created_at, updated_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, NULL)
                 ON CONFLICT (app_name, user_id, session_id, filter_key) WHERE deleted_at IS NULL
                 DO UPDATE SET summary = excluded.summary, updated_at = excluded.updated_at, expires_at = NULL",
                self.table
            ),
            params![
                key.app_name,
                key.user_id,
                key.session_id,
                filter_key,
                serde_json::to_string(summary)?,
                format_ts(now)
            ],
        )?;
        Ok(())
    }

    /// The active summary for `filter_key`.
    pub fn get(&self, conn: &Connection, key: &Key, filter_key: &str) -> Result<Option<Summary>> {
        let raw: Option<Option<String>> = conn
            .query_row(
                &format!(
                    "SELECT summary FROM {}
                     WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3 AND filter_key = ?4
                       AND deleted_at IS NULL",
                    self.table
                ),
                params![key.app_name, key.user_id, key.session_id, filter_key],
                |row| row.get(0),
            )
            .optional()?;
        match raw.flatten() {
            Some(text) if !text.is_empty() => Ok(Some(serde_json::from_str(&text)?)),
            _ => Ok(None),
        }
    }

    /// Every active summary of the session by filter key. Undecodable rows
    /// are logged and skipped.
    pub fn list(&self, conn: &Connection, key: &Key) -> Result<HashMap<String, Summary>> {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT filter_key, summary FROM {}
             WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3 AND deleted_at IS NULL",
            self.table
        ))?;
        let mut rows = stmt.query(params![key.app_name, key.user_id, key.session_id])?;
        let mut out = HashMap::new();
        while let Some(row) = rows.next()? {
            let filter_key: String = row.get(0)?;
            let Some(raw) = row.get::<_, Option<String>>(1)? else {
                continue;
            };
            match serde_json::from_str::<Summary>(&raw) {
                Ok(summary) => {
                    let _ = out.insert(filter_key, summary);
                }
                Err(e) => warn!(session = %key, filter_key = %filter_key, error = %e, "skipping undecodable summary"),
            }
        }
        Ok(out)
    }

    /// Soft- or hard-delete every summary of the session.
    pub fn delete(&self, conn: &Connection, key: &Key, soft: bool, now: DateTime<Utc>) -> Result<usize> {
        delete_session_rows(conn, self.table, key, soft, now)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
