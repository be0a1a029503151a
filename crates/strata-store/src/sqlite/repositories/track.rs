//! Track event repository: per-track protocol event logs.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use strata_core::time::{format_opt_ts, format_ts};
use strata_core::{Key, TrackEvent};
use tracing::warn;

use crate::errors::Result;
use crate::sqlite::repositories::delete_session_rows;

/// Repository over `session_track_events`.
#[derive(Clone, Copy, Debug)]
pub struct TrackRepo<'t> {
    table: &'t str,
}

impl<'t> TrackRepo<'t> {
    /// Repository over the qualified `table`.
    pub fn new(table: &'t str) -> Self {
        Self { table }
    }

    /// Insert one track event. `created_at` is the event's own timestamp.
    pub fn insert(
        &self,
        conn: &Connection,
        key: &Key,
        event: &TrackEvent,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let _ = conn.execute(
            &format!(
                "INSERT INTO {} (app_name, user_id, session_id, track, event, created_at, updated_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                self.table
            ),
            params![
                key.app_name,
                key.user_id,
                key.session_id,
                event.track,
                serde_json::to_string(event)?,
                format_ts(event.timestamp),
                format_ts(now),
                format_opt_ts(expires_at)
            ],
        )?;
        Ok(())
    }

    /// Active events on `track` created strictly after `after`, newest
    /// `limit` (0 = all), returned oldest first.
    pub fn list(
        &self,
        conn: &Connection,
        key: &Key,
        track: &str,
        after: Option<DateTime<Utc>>,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrackEvent>> {
        let limit = if limit == 0 { -1 } else { i64::try_from(limit).unwrap_or(i64::MAX) };
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT id, event FROM {}
             WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3 AND track = ?4
               AND deleted_at IS NULL AND (expires_at IS NULL OR expires_at > ?5)
               AND (?6 IS NULL OR created_at > ?6)
             ORDER BY created_at DESC, id DESC
             LIMIT ?7",
            self.table
        ))?;
        let mut rows = stmt.query(params![
            key.app_name,
            key.user_id,
            key.session_id,
            track,
            format_ts(now),
            after.map(format_ts),
            limit
        ])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let raw: String = row.get(1)?;
            match serde_json::from_str::<TrackEvent>(&raw) {
                Ok(event) => events.push(event),
                Err(e) => warn!(session = %key, track, row_id = id, error = %e, "skipping undecodable track event"),
            }
        }
        events.reverse();
        Ok(events)
    }

    /// Soft- or hard-delete every track event of the session.
    pub fn delete(&self, conn: &Connection, key: &Key, soft: bool, now: DateTime<Utc>) -> Result<usize> {
        delete_session_rows(conn, self.table, key, soft, now)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::repositories::test_support::{count, setup};
    use chrono::TimeDelta;
    use serde_json::json;

    fn key() -> Key {
        Key::new("app", "user", "s1")
    }

    fn at(track: &str, n: i64, ts: DateTime<Utc>) -> TrackEvent {
        TrackEvent {
            track: track.into(),
            payload: json!({ "n": n }),
            timestamp: ts,
        }
    }

    #[test]
    fn tracks_are_separate_and_chronological() {
        let (conn, names) = setup();
        let repo = TrackRepo::new(&names.session_track_events);
        let now = Utc::now();
        for n in 0..3 {
            repo.insert(&conn, &key(), &at("ag-ui", n, now + TimeDelta::seconds(n)), now, None)
                .unwrap();
        }
        repo.insert(&conn, &key(), &at("audit", 9, now), now, None).unwrap();

        let later = now + TimeDelta::minutes(1);
        let ui = repo.list(&conn, &key(), "ag-ui", None, 2, later).unwrap();
        assert_eq!(ui.iter().map(|e| e.payload["n"].as_i64().unwrap()).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(repo.list(&conn, &key(), "audit", None, 0, later).unwrap().len(), 1);
        assert_eq!(
            repo.list(&conn, &key(), "ag-ui", Some(now), 0, later).unwrap().len(),
            2
        );
    }

    #[test]
    fn expired_track_rows_are_hidden() {
        let (conn, names) = setup();
        let repo = TrackRepo::new(&names.session_track_events);
        let now = Utc::now();
        repo.insert(&conn, &key(), &at("t", 1, now), now, Some(now + TimeDelta::seconds(5)))
            .unwrap();
        assert_eq!(repo.list(&conn, &key(), "t", None, 0, now).unwrap().len(), 1);
        assert!(
            repo.list(&conn, &key(), "t", None, 0, now + TimeDelta::seconds(5))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn delete_soft() {
        let (conn, names) = setup();
        let repo = TrackRepo::new(&names.session_track_events);
        let now = Utc::now();
        repo.insert(&conn, &key(), &at("t", 1, now), now, None).unwrap();
        assert_eq!(repo.delete(&conn, &key(), true, now).unwrap(), 1);
        assert_eq!(count(&conn, "session_track_events", "deleted_at IS NOT NULL"), 1);
        assert!(repo.list(&conn, &key(), "t", None, 0, now).unwrap().is_empty());
    }
}
