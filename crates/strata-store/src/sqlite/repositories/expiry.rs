//! TTL sweeps across all six tables.
//!
//! Rows with their own expiry (`session_states`, `session_track_events`,
//! `app_states`, `user_states`) are swept when `expires_at <= now`. Events
//! and summaries never expire on their own; they are swept once their
//! session no longer has a live `session_states` row, so the state sweep
//! must run first within the same transaction.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ToSql};
use strata_core::UserKey;
use strata_core::time::format_ts;

use crate::errors::Result;
use crate::sqlite::schema::TableNames;

/// Which tables a sweep covers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepPolicy {
    /// Sweep session states, tracks, events, and summaries.
    pub sessions: bool,
    /// Sweep app states.
    pub app_states: bool,
    /// Sweep user states.
    pub user_states: bool,
}

impl SweepPolicy {
    /// Whether the sweep would touch anything.
    pub fn is_empty(&self) -> bool {
        !(self.sessions || self.app_states || self.user_states)
    }
}

/// Rows affected per table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepCounts {
    /// `session_states`.
    pub session_states: usize,
    /// `session_track_events`.
    pub track_events: usize,
    /// `session_events`.
    pub events: usize,
    /// `session_summaries`.
    pub summaries: usize,
    /// `app_states`.
    pub app_states: usize,
    /// `user_states`.
    pub user_states: usize,
}

impl SweepCounts {
    /// Sum over all tables.
    pub fn total(&self) -> usize {
        self.session_states
            + self.track_events
            + self.events
            + self.summaries
            + self.app_states
            + self.user_states
    }
}

/// Expiry sweeps over one table set.
#[derive(Clone, Copy, Debug)]
pub struct ExpiryRepo<'t> {
    names: &'t TableNames,
}

impl<'t> ExpiryRepo<'t> {
    /// Sweeps over `names`.
    pub fn new(names: &'t TableNames) -> Self {
        Self { names }
    }

    /// Sweep expired rows. `scope` restricts the sweep to one user and
    /// skips the app-wide table.
    pub fn sweep(
        &self,
        conn: &Connection,
        policy: SweepPolicy,
        scope: Option<&UserKey>,
        soft: bool,
        now: DateTime<Utc>,
    ) -> Result<SweepCounts> {
        let mut counts = SweepCounts::default();
        let now = format_ts(now);
        if policy.sessions {
            counts.session_states = sweep_expired(conn, &self.names.session_states, scope, soft, &now)?;
            counts.track_events = sweep_expired(conn, &self.names.session_track_events, scope, soft, &now)?;
            counts.events = self.sweep_orphans(conn, &self.names.session_events, scope, soft, &now)?;
            counts.summaries = self.sweep_orphans(conn, &self.names.session_summaries, scope, soft, &now)?;
        }
        if policy.app_states && scope.is_none() {
            counts.app_states = sweep_expired(conn, &self.names.app_states, None, soft, &now)?;
        }
        if policy.user_states {
            counts.user_states = sweep_expired(conn, &self.names.user_states, scope, soft, &now)?;
        }
        Ok(counts)
    }

    fn sweep_orphans(
        &self,
        conn: &Connection,
        table: &str,
        scope: Option<&UserKey>,
        soft: bool,
        now: &str,
    ) -> Result<usize> {
        let live = format!(
            "(app_name, user_id, session_id) NOT IN (
                SELECT app_name, user_id, session_id FROM {} WHERE deleted_at IS NULL)",
            self.names.session_states
        );
        run_sweep(conn, table, &live, scope, soft, now)
    }
}

fn sweep_expired(
    conn: &Connection,
    table: &str,
    scope: Option<&UserKey>,
    soft: bool,
    now: &str,
) -> Result<usize> {
    run_sweep(conn, table, "expires_at IS NOT NULL AND expires_at <= ?1", scope, soft, now)
}

/// Apply `predicate` (which may reference `?1` = now) as a soft or hard
/// delete, optionally narrowed to one user (`?2`, `?3`).
fn run_sweep(
    conn: &Connection,
    table: &str,
    predicate: &str,
    scope: Option<&UserKey>,
    soft: bool,
    now: &str,
) -> Result<usize> {
    let mut filter = predicate.to_string();
    let mut params: Vec<&dyn ToSql> = vec![&now];
    if let Some(user) = scope {
        filter.push_str(" AND app_name = ?2 AND user_id = ?3");
        params.push(&user.app_name);
        params.push(&user.user_id);
    }
    let sql = if soft {
        format!("UPDATE {table} SET deleted_at = ?1 WHERE deleted_at IS NULL AND {filter}")
    } else {
        format!("DELETE FROM {table} WHERE {filter}")
    };
    Ok(conn.execute(&sql, params.as_slice())?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::repositories::test_support::{count, setup};
    use crate::sqlite::repositories::{
        AppStateRepo, EventRepo, SessionStateRepo, SummaryRepo, TrackRepo, UserStateRepo,
    };
    use chrono::TimeDelta;
    use strata_core::{Event, Key, StateMap, Summary, TrackEvent};

    const ALL: SweepPolicy = SweepPolicy {
        sessions: true,
        app_states: true,
        user_states: true,
    };

    struct Fixture {
        now: DateTime<Utc>,
    }

    fn seed(conn: &Connection, names: &TableNames, key: &Key, expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) {
        SessionStateRepo::new(&names.session_states)
            .insert(conn, key, &StateMap::new(), now, expires_at)
            .unwrap();
        let _ = EventRepo::new(&names.session_events)
            .insert(conn, key, &Event::new("user"), now)
            .unwrap();
        TrackRepo::new(&names.session_track_events)
            .insert(conn, key, &TrackEvent::new("t", serde_json::json!({})), now, expires_at)
            .unwrap();
        SummaryRepo::new(&names.session_summaries)
            .upsert(conn, key, "", &Summary::default(), now)
            .unwrap();
    }

    fn fixture(conn: &Connection, names: &TableNames) -> Fixture {
        let now = Utc::now();
        let past = Some(now - TimeDelta::minutes(1));
        let future = Some(now + TimeDelta::hours(1));
        seed(conn, names, &Key::new("a", "u", "expired"), past, now - TimeDelta::hours(1));
        seed(conn, names, &Key::new("a", "u", "live"), future, now);
        seed(conn, names, &Key::new("a", "other", "expired"), past, now - TimeDelta::hours(1));
        let apps = AppStateRepo::new(&names.app_states);
        apps.upsert(conn, "a", "old", b"1", now, past).unwrap();
        apps.upsert(conn, "a", "new", b"1", now, future).unwrap();
        let users = UserStateRepo::new(&names.user_states);
        users.upsert(conn, &UserKey::new("a", "u"), "old", b"1", now, past).unwrap();
        users.upsert(conn, &UserKey::new("a", "other"), "old", b"1", now, past).unwrap();
        Fixture { now }
    }

    #[test]
    fn soft_sweep_marks_expired_and_orphaned_rows() {
        let (conn, names) = setup();
        let f = fixture(&conn, &names);
        let counts = ExpiryRepo::new(&names).sweep(&conn, ALL, None, true, f.now).unwrap();
        assert_eq!(
            counts,
            SweepCounts {
                session_states: 2,
                track_events: 2,
                events: 2,
                summaries: 2,
                app_states: 1,
                user_states: 2,
            }
        );
        assert_eq!(counts.total(), 11);
        assert_eq!(count(&conn, "session_events", "deleted_at IS NULL"), 1);
        assert_eq!(count(&conn, "session_events", "session_id = 'live' AND deleted_at IS NULL"), 1);

        // a second pass finds nothing
        assert_eq!(
            ExpiryRepo::new(&names).sweep(&conn, ALL, None, true, f.now).unwrap().total(),
            0
        );
    }

    #[test]
    fn hard_sweep_removes_rows() {
        let (conn, names) = setup();
        let f = fixture(&conn, &names);
        let _ = ExpiryRepo::new(&names).sweep(&conn, ALL, None, false, f.now).unwrap();
        assert_eq!(count(&conn, "session_states", "1 = 1"), 1);
        assert_eq!(count(&conn, "session_summaries", "1 = 1"), 1);
        assert_eq!(count(&conn, "app_states", "1 = 1"), 1);
        assert_eq!(count(&conn, "user_states", "1 = 1"), 0);
    }

    #[test]
    fn user_scope_skips_other_users_and_app_states() {
        let (conn, names) = setup();
        let f = fixture(&conn, &names);
        let scope = UserKey::new("a", "u");
        let counts = ExpiryRepo::new(&names)
            .sweep(&conn, ALL, Some(&scope), false, f.now)
            .unwrap();
        assert_eq!(counts.session_states, 1);
        assert_eq!(counts.events, 1);
        assert_eq!(counts.app_states, 0);
        assert_eq!(counts.user_states, 1);
        assert_eq!(count(&conn, "session_states", "user_id = 'other'"), 1);
        assert_eq!(count(&conn, "app_states", "1 = 1"), 2);
    }

    #[test]
    fn policy_limits_tables() {
        let (conn, names) = setup();
        let f = fixture(&conn, &names);
        let only_apps = SweepPolicy {
            app_states: true,
            ..SweepPolicy::default()
        };
        let counts = ExpiryRepo::new(&names).sweep(&conn, only_apps, None, true, f.now).unwrap();
        assert_eq!(counts.total(), 1);
        assert!(SweepPolicy::default().is_empty());
    }

    #[test]
    fn sessions_without_ttl_are_kept() {
        let (conn, names) = setup();
        let now = Utc::now();
        seed(&conn, &names, &Key::new("a", "u", "forever"), None, now);
        let counts = ExpiryRepo::new(&names)
            .sweep(&conn, ALL, None, false, now + TimeDelta::days(365))
            .unwrap();
        assert_eq!(counts.total(), 0);
    }
}
