//! Session state repository: one row per live session.
//!
//! The row carries the session-scoped state document and the session's
//! expiry. A partial unique index keeps at most one non-deleted row per
//! `(app, user, session)`.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use strata_core::time::{format_opt_ts, format_ts};
use strata_core::{Key, StateMap, UserKey};
use tracing::warn;

use crate::errors::Result;
use crate::sqlite::repositories::delete_session_rows;
use crate::sqlite::row_types::{SessionStateRow, StateDocument, parse_column, parse_opt_column};

const COLUMNS: &str = "session_id, state, created_at, updated_at, expires_at";

/// Repository over `session_states`.
#[derive(Clone, Copy, Debug)]
pub struct SessionStateRepo<'t> {
    table: &'t str,
}

impl<'t> SessionStateRepo<'t> {
    /// Repository over the qualified `table`.
    pub fn new(table: &'t str) -> Self {
        Self { table }
    }

    fn map_row(row: &Row<'_>) -> Result<SessionStateRow> {
        let state: Option<String> = row.get(1)?;
        let created_at: String = row.get(2)?;
        let updated_at: String = row.get(3)?;
        let expires_at: Option<String> = row.get(4)?;
        Ok(SessionStateRow {
            session_id: row.get(0)?,
            state: StateDocument::decode(state.as_deref())?,
            created_at: parse_column(&created_at)?,
            updated_at: parse_column(&updated_at)?,
            expires_at: parse_opt_column(expires_at.as_deref())?,
        })
    }

    /// The non-deleted row for `key`, expired or not.
    pub fn get_undeleted(&self, conn: &Connection, key: &Key) -> Result<Option<SessionStateRow>> {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {COLUMNS} FROM {}
             WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3 AND deleted_at IS NULL",
            self.table
        ))?;
        let mut rows = stmt.query(params![key.app_name, key.user_id, key.session_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::map_row(row)?)),
            None => Ok(None),
        }
    }

    /// The active (non-deleted, unexpired) row for `key`.
    pub fn get_active(
        &self,
        conn: &Connection,
        key: &Key,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionStateRow>> {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {COLUMNS} FROM {}
             WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3 AND deleted_at IS NULL
               AND (expires_at IS NULL OR expires_at > ?4)",
            self.table
        ))?;
        let mut rows = stmt.query(params![key.app_name, key.user_id, key.session_id, format_ts(now)])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::map_row(row)?)),
            None => Ok(None),
        }
    }

    /// Expiry of the non-deleted row for `key`. The outer `Option` is
    /// whether a row exists.
    pub fn undeleted_expiry(
        &self,
        conn: &Connection,
        key: &Key,
    ) -> Result<Option<Option<DateTime<Utc>>>> {
        let raw: Option<Option<String>> = conn
            .query_row(
                &format!(
                    "SELECT expires_at FROM {}
                     WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3 AND deleted_at IS NULL",
                    self.table
                ),
                params![key.app_name, key.user_id, key.session_id],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|e| parse_opt_column(e.as_deref())).transpose()
    }

    /// Active rows for a user, most recently updated first. Rows whose
    /// state cannot be decoded are logged and skipped.
    pub fn list_active(
        &self,
        conn: &Connection,
        user: &UserKey,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionStateRow>> {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {COLUMNS} FROM {}
             WHERE app_name = ?1 AND user_id = ?2 AND deleted_at IS NULL
               AND (expires_at IS NULL OR expires_at > ?3)
             ORDER BY updated_at DESC, id DESC",
            self.table
        ))?;
        let mut rows = stmt.query(params![user.app_name, user.user_id, format_ts(now)])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            match Self::map_row(row) {
                Ok(r) => out.push(r),
                Err(e) => {
                    let session_id: String = row.get(0).unwrap_or_default();
                    warn!(app = %user.app_name, user = %user.user_id, session = %session_id, error = %e, "skipping unreadable session row");
                }
            }
        }
        Ok(out)
    }

    /// Insert a new row.
    pub fn insert(
        &self,
        conn: &Connection,
        key: &Key,
        state: &StateMap,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let now = format_ts(now);
        let _ = conn.execute(
            &format!(
                "INSERT INTO {} (app_name, user_id, session_id, state, created_at, updated_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6)",
                self.table
            ),
            params![
                key.app_name,
                key.user_id,
                key.session_id,
                StateDocument::encode(state)?,
                now,
                format_opt_ts(expires_at)
            ],
        )?;
        Ok(())
    }

    /// Replace the state document and expiry of the non-deleted row.
    /// Returns the number of rows changed.
    pub fn update_state(
        &self,
        conn: &Connection,
        key: &Key,
        state: &StateMap,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        Ok(conn.execute(
            &format!(
                "UPDATE {} SET state = ?4, updated_at = ?5, expires_at = ?6
                 WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3 AND deleted_at IS NULL",
                self.table
            ),
            params![
                key.app_name,
                key.user_id,
                key.session_id,
                StateDocument::encode(state)?,
                format_ts(now),
                format_opt_ts(expires_at)
            ],
        )?)
    }

    /// Extend the expiry of the non-deleted row.
    pub fn refresh_ttl(
        &self,
        conn: &Connection,
        key: &Key,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<usize> {
        Ok(conn.execute(
            &format!(
                "UPDATE {} SET updated_at = ?4, expires_at = ?5
                 WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3 AND deleted_at IS NULL",
                self.table
            ),
            params![
                key.app_name,
                key.user_id,
                key.session_id,
                format_ts(now),
                format_ts(expires_at)
            ],
        )?)
    }

    /// Soft- or hard-delete the session row.
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
    use crate::errors::StorageError;
    use crate::sqlite::repositories::test_support::{count, setup};
    use assert_matches::assert_matches;
    use chrono::TimeDelta;

    fn key(s: &str) -> Key {
        Key::new("app", "user", s)
    }

    fn state(k: &str, v: &[u8]) -> StateMap {
        StateMap::from([(k.to_string(), v.to_vec())])
    }

    #[test]
    fn insert_and_get() {
        let (conn, names) = setup();
        let repo = SessionStateRepo::new(&names.session_states);
        let now = Utc::now();
        repo.insert(&conn, &key("s1"), &state("k", b"v"), now, None).unwrap();

        let row = repo.get_active(&conn, &key("s1"), now).unwrap().unwrap();
        assert_eq!(row.session_id, "s1");
        assert_eq!(row.state, state("k", b"v"));
        assert!(row.expires_at.is_none());
        assert!(repo.get_active(&conn, &key("missing"), now).unwrap().is_none());
    }

    #[test]
    fn second_active_row_violates_unique_index() {
        let (conn, names) = setup();
        let repo = SessionStateRepo::new(&names.session_states);
        let now = Utc::now();
        repo.insert(&conn, &key("s1"), &StateMap::new(), now, None).unwrap();
        let err = repo.insert(&conn, &key("s1"), &StateMap::new(), now, None).unwrap_err();
        assert_eq!(err.class(), crate::errors::StorageErrorClass::Constraint);
    }

    #[test]
    fn expired_rows_are_not_active_but_undeleted() {
        let (conn, names) = setup();
        let repo = SessionStateRepo::new(&names.session_states);
        let now = Utc::now();
        let expires = now - TimeDelta::minutes(1);
        repo.insert(&conn, &key("s1"), &StateMap::new(), now - TimeDelta::hours(1), Some(expires))
            .unwrap();

        assert!(repo.get_active(&conn, &key("s1"), now).unwrap().is_none());
        let row = repo.get_undeleted(&conn, &key("s1")).unwrap().unwrap();
        assert!(row.is_expired(now));
        assert_eq!(repo.undeleted_expiry(&conn, &key("s1")).unwrap(), Some(Some(row.expires_at.unwrap())));
        assert_eq!(repo.undeleted_expiry(&conn, &key("nope")).unwrap(), None);
    }

    #[test]
    fn update_and_refresh() {
        let (conn, names) = setup();
        let repo = SessionStateRepo::new(&names.session_states);
        let now = Utc::now();
        repo.insert(&conn, &key("s1"), &StateMap::new(), now, Some(now + TimeDelta::minutes(5)))
            .unwrap();

        let later = now + TimeDelta::minutes(1);
        assert_eq!(
            repo.update_state(&conn, &key("s1"), &state("a", b"1"), later, None).unwrap(),
            1
        );
        let row = repo.get_active(&conn, &key("s1"), later).unwrap().unwrap();
        assert_eq!(row.state, state("a", b"1"));
        assert!(row.expires_at.is_none());

        let expiry = later + TimeDelta::hours(1);
        assert_eq!(repo.refresh_ttl(&conn, &key("s1"), later, expiry).unwrap(), 1);
        let row = repo.get_active(&conn, &key("s1"), later).unwrap().unwrap();
        assert_eq!(row.expires_at, Some(expiry));
    }

    #[test]
    fn list_orders_by_recent_update_and_skips_bad_rows() {
        let (conn, names) = setup();
        let repo = SessionStateRepo::new(&names.session_states);
        let now = Utc::now();
        repo.insert(&conn, &key("old"), &StateMap::new(), now - TimeDelta::minutes(2), None).unwrap();
        repo.insert(&conn, &key("new"), &StateMap::new(), now - TimeDelta::minutes(1), None).unwrap();
        repo.insert(&conn, &key("bad"), &StateMap::new(), now, None).unwrap();
        let _ = conn
            .execute("UPDATE session_states SET state = '{' WHERE session_id = 'bad'", [])
            .unwrap();
        repo.insert(&conn, &Key::new("app", "other", "x"), &StateMap::new(), now, None).unwrap();

        let rows = repo.list_active(&conn, &UserKey::new("app", "user"), now).unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.session_id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[test]
    fn corrupt_single_row_is_an_error() {
        let (conn, names) = setup();
        let repo = SessionStateRepo::new(&names.session_states);
        let now = Utc::now();
        repo.insert(&conn, &key("s1"), &StateMap::new(), now, None).unwrap();
        let _ = conn.execute("UPDATE session_states SET state = 'nope'", []).unwrap();
        assert_matches!(repo.get_active(&conn, &key("s1"), now), Err(StorageError::Serde(_)));
    }

    #[test]
    fn soft_delete_frees_the_key() {
        let (conn, names) = setup();
        let repo = SessionStateRepo::new(&names.session_states);
        let now = Utc::now();
        repo.insert(&conn, &key("s1"), &StateMap::new(), now, None).unwrap();
        assert_eq!(repo.delete(&conn, &key("s1"), true, now).unwrap(), 1);
        assert_eq!(repo.delete(&conn, &key("s1"), true, now).unwrap(), 0);
        repo.insert(&conn, &key("s1"), &StateMap::new(), now, None).unwrap();
        assert_eq!(count(&conn, "session_states", "session_id = 's1'"), 2);

        assert_eq!(repo.delete(&conn, &key("s1"), false, now).unwrap(), 2);
        assert_eq!(count(&conn, "session_states", "1 = 1"), 0);
    }
}
