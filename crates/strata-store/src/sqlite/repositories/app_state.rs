//! App-scoped state repository.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use strata_core::StateMap;
use strata_core::time::{format_opt_ts, format_ts};

use crate::errors::Result;

/// Repository over `app_states`.
#[derive(Clone, Copy, Debug)]
pub struct AppStateRepo<'t> {
    table: &'t str,
}

impl<'t> AppStateRepo<'t> {
    /// Repository over the qualified `table`.
    pub fn new(table: &'t str) -> Self {
        Self { table }
    }

    /// Insert or overwrite one key. Last write wins.
    pub fn upsert(
        &self,
        conn: &Connection,
        app_name: &str,
        key: &str,
        value: &[u8],
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let _ = conn.execute(
            &format!(
                "INSERT INTO {} (app_name, key, value, created_at, updated_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?4, ?5)
                 ON CONFLICT (app_name, key) WHERE deleted_at IS NULL
                 DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at,
                               expires_at = excluded.expires_at",
                self.table
            ),
            params![app_name, key, value, format_ts(now), format_opt_ts(expires_at)],
        )?;
        Ok(())
    }

    /// Active entries for `app_name`.
    pub fn list(&self, conn: &Connection, app_name: &str, now: DateTime<Utc>) -> Result<StateMap> {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT key, value FROM {}
             WHERE app_name = ?1 AND deleted_at IS NULL AND (expires_at IS NULL OR expires_at > ?2)",
            self.table
        ))?;
        let mut rows = stmt.query(params![app_name, format_ts(now)])?;
        let mut out = StateMap::new();
        while let Some(row) = rows.next()? {
            let value: Option<Vec<u8>> = row.get(1)?;
            let _ = out.insert(row.get(0)?, value.unwrap_or_default());
        }
        Ok(out)
    }

    /// Soft- or hard-delete one key.
    pub fn delete(
        &self,
        conn: &Connection,
        app_name: &str,
        key: &str,
        soft: bool,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let changed = if soft {
            conn.execute(
                &format!(
                    "UPDATE {} SET deleted_at = ?3 WHERE app_name = ?1 AND key = ?2 AND deleted_at IS NULL",
                    self.table
                ),
                params![app_name, key, format_ts(now)],
            )?
        } else {
            conn.execute(
                &format!("DELETE FROM {} WHERE app_name = ?1 AND key = ?2", self.table),
                params![app_name, key],
            )?
        };
        Ok(changed)
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

    #[test]
    fn upsert_is_last_write_wins() {
        let (conn, names) = setup();
        let repo = AppStateRepo::new(&names.app_states);
        let now = Utc::now();
        repo.upsert(&conn, "app", "k", b"1", now, None).unwrap();
        repo.upsert(&conn, "app", "k", b"2", now, None).unwrap();
        repo.upsert(&conn, "other", "k", b"x", now, None).unwrap();

        let state = repo.list(&conn, "app", now).unwrap();
        assert_eq!(state, StateMap::from([("k".to_string(), b"2".to_vec())]));
        assert_eq!(count(&conn, "app_states", "1 = 1"), 2);
    }

    #[test]
    fn expired_entries_are_hidden() {
        let (conn, names) = setup();
        let repo = AppStateRepo::new(&names.app_states);
        let now = Utc::now();
        repo.upsert(&conn, "app", "short", b"v", now, Some(now + TimeDelta::seconds(1)))
            .unwrap();
        repo.upsert(&conn, "app", "long", b"v", now, None).unwrap();
        let state = repo.list(&conn, "app", now + TimeDelta::seconds(2)).unwrap();
        assert!(state.contains_key("long"));
        assert!(!state.contains_key("short"));
    }

    #[test]
    fn soft_then_hard_delete() {
        let (conn, names) = setup();
        let repo = AppStateRepo::new(&names.app_states);
        let now = Utc::now();
        repo.upsert(&conn, "app", "k", b"1", now, None).unwrap();
        assert_eq!(repo.delete(&conn, "app", "k", true, now).unwrap(), 1);
        assert!(repo.list(&conn, "app", now).unwrap().is_empty());

        repo.upsert(&conn, "app", "k", b"2", now, None).unwrap();
        assert_eq!(count(&conn, "app_states", "1 = 1"), 2);
        assert_eq!(repo.delete(&conn, "app", "k", false, now).unwrap(), 2);
    }
}
