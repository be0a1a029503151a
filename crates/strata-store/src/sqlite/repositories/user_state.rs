//! User-scoped state repository.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use strata_core::time::{format_opt_ts, format_ts};
use strata_core::{StateMap, UserKey};

use crate::errors::Result;

/// Repository over `user_states`.
#[derive(Clone, Copy, Debug)]
pub struct UserStateRepo<'t> {
    table: &'t str,
}

impl<'t> UserStateRepo<'t> {
    /// Repository over the qualified `table`.
    pub fn new(table: &'t str) -> Self {
        Self { table }
    }

    /// Insert or overwrite one key. Last write wins.
    pub fn upsert(
        &self,
        conn: &Connection,
        user: &UserKey,
        key: &str,
        value: &[u8],
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let _ = conn.execute(
            &format!(
                "INSERT INTO {} (app_name, user_id, key, value, created_at, updated_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6)
                 ON CONFLICT (app_name, user_id, key) WHERE deleted_at IS NULL
                 DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at,
                               expires_at = excluded.expires_at",
                self.table
            ),
            params![
                user.app_name,
                user.user_id,
                key,
                value,
                format_ts(now),
                format_opt_ts(expires_at)
            ],
        )?;
        Ok(())
    }

    /// Active entries for `user`.
    pub fn list(&self, conn: &Connection, user: &UserKey, now: DateTime<Utc>) -> Result<StateMap> {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT key, value FROM {}
             WHERE app_name = ?1 AND user_id = ?2 AND deleted_at IS NULL
               AND (expires_at IS NULL OR expires_at > ?3)",
            self.table
        ))?;
        let mut rows = stmt.query(params![user.app_name, user.user_id, format_ts(now)])?;
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
        user: &UserKey,
        key: &str,
        soft: bool,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let changed = if soft {
            conn.execute(
                &format!(
                    "UPDATE {} SET deleted_at = ?4
                     WHERE app_name = ?1 AND user_id = ?2 AND key = ?3 AND deleted_at IS NULL",
                    self.table
                ),
                params![user.app_name, user.user_id, key, format_ts(now)],
            )?
        } else {
            conn.execute(
                &format!(
                    "DELETE FROM {} WHERE app_name = ?1 AND user_id = ?2 AND key = ?3",
                    self.table
                ),
                params![user.app_name, user.user_id, key],
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
    use crate::sqlite::repositories::test_support::setup;

    #[test]
    fn scoped_per_user() {
        let (conn, names) = setup();
        let repo = UserStateRepo::new(&names.user_states);
        let now = Utc::now();
        let alice = UserKey::new("app", "alice");
        let bob = UserKey::new("app", "bob");
        repo.upsert(&conn, &alice, "theme", b"dark", now, None).unwrap();
        repo.upsert(&conn, &bob, "theme", b"light", now, None).unwrap();
        repo.upsert(&conn, &alice, "theme", b"solarized", now, None).unwrap();

        assert_eq!(repo.list(&conn, &alice, now).unwrap()["theme"], b"solarized");
        assert_eq!(repo.list(&conn, &bob, now).unwrap()["theme"], b"light");
    }

    #[test]
    fn delete_one_key() {
        let (conn, names) = setup();
        let repo = UserStateRepo::new(&names.user_states);
        let now = Utc::now();
        let user = UserKey::new("app", "u");
        repo.upsert(&conn, &user, "a", b"1", now, None).unwrap();
        repo.upsert(&conn, &user, "b", b"2", now, None).unwrap();
        assert_eq!(repo.delete(&conn, &user, "a", true, now).unwrap(), 1);
        let state = repo.list(&conn, &user, now).unwrap();
        assert_eq!(state.len(), 1);
        assert!(state.contains_key("b"));
        assert_eq!(repo.delete(&conn, &user, "missing", false, now).unwrap(), 0);
    }
}
