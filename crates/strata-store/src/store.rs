//! Storage protocols shared by the service, the worker pools, and the
//! cleanup task.
//!
//! [`SessionStore`] owns the storage client and the table names and runs
//! every multi-statement protocol (create, load, append, delete, state CRUD,
//! TTL sweep, summary persistence). Calls are synchronous; the service and
//! the workers invoke them directly from async tasks, the same way the event
//! persister drives its store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::Connection;
use strata_core::state::{ensure_track, is_scoped_key, merge_scoped, strip_app_prefix, strip_user_prefix, tracks_from_state};
use strata_core::{
    Context, Event, Key, KeyError, Options, Result, Session, SessionError, SessionSnapshot,
    StateMap, Summary, TrackEvent, TrackEvents, UserKey,
};
use strata_summary::{Summarizer, summarize_session};
use tracing::{debug, info, warn};

use crate::errors::WithOp;
use crate::sqlite::client::StorageClient;
use crate::sqlite::repositories::expiry::{SweepCounts, SweepPolicy};
use crate::sqlite::repositories::{
    AppStateRepo, EventRepo, ExpiryRepo, SessionStateRepo, SummaryRepo, TrackRepo, UserStateRepo,
};
use crate::sqlite::row_types::SessionStateRow;
use crate::sqlite::schema::TableNames;

const OP_CREATE_SESSION: &str = "sqlite session service create session";
const OP_GET_SESSION: &str = "sqlite session service get session";
const OP_LIST_SESSIONS: &str = "sqlite session service list sessions";
const OP_DELETE_SESSION: &str = "sqlite session service delete session";
const OP_APPEND_EVENT: &str = "sqlite session service append event";
const OP_APPEND_TRACK_EVENT: &str = "sqlite session service append track event";
const OP_UPDATE_APP_STATE: &str = "sqlite session service update app state";
const OP_LIST_APP_STATES: &str = "sqlite session service list app states";
const OP_DELETE_APP_STATE: &str = "sqlite session service delete app state";
const OP_UPDATE_USER_STATE: &str = "sqlite session service update user state";
const OP_LIST_USER_STATES: &str = "sqlite session service list user states";
const OP_DELETE_USER_STATE: &str = "sqlite session service delete user state";
const OP_UPDATE_SESSION_STATE: &str = "sqlite session service update session state";
const OP_CLEANUP: &str = "sqlite session service cleanup expired";
const OP_SAVE_SUMMARY: &str = "sqlite session service create session summary";
const OP_GET_SUMMARY: &str = "sqlite session service get session summary";

/// Lifecycle policy applied by the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorePolicy {
    /// Session TTL (zero = no expiry).
    pub session_ttl: Duration,
    /// App state TTL (zero = no expiry).
    pub app_state_ttl: Duration,
    /// User state TTL (zero = no expiry).
    pub user_state_ttl: Duration,
    /// Maximum active events per session (0 = unbounded).
    pub event_limit: usize,
    /// Mark rows deleted instead of removing them.
    pub soft_delete: bool,
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self {
            session_ttl: Duration::ZERO,
            app_state_ttl: Duration::ZERO,
            user_state_ttl: Duration::ZERO,
            event_limit: 1000,
            soft_delete: true,
        }
    }
}

impl StorePolicy {
    /// Tables with a positive TTL.
    pub fn sweep_policy(&self) -> SweepPolicy {
        SweepPolicy {
            sessions: !self.session_ttl.is_zero(),
            app_states: !self.app_state_ttl.is_zero(),
            user_states: !self.user_state_ttl.is_zero(),
        }
    }
}

/// `now + ttl`, or `None` when the TTL is disabled (or too large to
/// represent).
pub fn expires_after(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    if ttl.is_zero() {
        return None;
    }
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
}

fn not_found(key: &Key) -> SessionError {
    SessionError::NotFound(format!("session {key}"))
}

/// Storage protocols over one table set.
pub struct SessionStore {
    client: StorageClient,
    tables: TableNames,
    policy: StorePolicy,
    summarizer: Option<Arc<dyn Summarizer>>,
}

impl SessionStore {
    /// Assemble a store.
    pub fn new(
        client: StorageClient,
        tables: TableNames,
        policy: StorePolicy,
        summarizer: Option<Arc<dyn Summarizer>>,
    ) -> Self {
        Self {
            client,
            tables,
            policy,
            summarizer,
        }
    }

    /// The storage client.
    pub fn client(&self) -> &StorageClient {
        &self.client
    }

    /// Table names in use.
    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// Lifecycle policy.
    pub fn policy(&self) -> &StorePolicy {
        &self.policy
    }

    /// Configured summarizer.
    pub fn summarizer(&self) -> Option<&Arc<dyn Summarizer>> {
        self.summarizer.as_ref()
    }

    fn states(&self) -> SessionStateRepo<'_> {
        SessionStateRepo::new(&self.tables.session_states)
    }

    fn events(&self) -> EventRepo<'_> {
        EventRepo::new(&self.tables.session_events)
    }

    fn tracks(&self) -> TrackRepo<'_> {
        TrackRepo::new(&self.tables.session_track_events)
    }

    fn summaries(&self) -> SummaryRepo<'_> {
        SummaryRepo::new(&self.tables.session_summaries)
    }

    fn app_states(&self) -> AppStateRepo<'_> {
        AppStateRepo::new(&self.tables.app_states)
    }

    fn user_states(&self) -> UserStateRepo<'_> {
        UserStateRepo::new(&self.tables.user_states)
    }

    // ── Sessions ────────────────────────────────────────────────────────

    /// Insert a new session row and return the in-memory session with app
    /// and user state merged in.
    ///
    /// An existing live row fails with `AlreadyExists`. An expired one
    /// triggers a user-scoped sweep in the same transaction first.
    pub fn create_session(&self, ctx: &Context, key: &Key, state: &StateMap) -> Result<Session> {
        key.check_session_key()?;
        let now = Utc::now();
        let expires_at = expires_after(now, self.policy.session_ttl);
        let user = key.user_key();

        let created = self
            .client
            .transaction(ctx, |tx| {
                if let Some(existing) = self.states().undeleted_expiry(tx, key)? {
                    if existing.is_none_or(|t| t > now) {
                        return Ok(false);
                    }
                    info!(app = %key.app_name, user = %key.user_id, session = %key.session_id, "found expired session, cleaning up before create");
                    let policy = SweepPolicy {
                        sessions: true,
                        ..self.policy.sweep_policy()
                    };
                    let counts =
                        ExpiryRepo::new(&self.tables).sweep(tx, policy, Some(&user), self.policy.soft_delete, now)?;
                    debug!(session = %key, swept = counts.total(), "user-scoped cleanup done");
                }
                self.states().insert(tx, key, state, now, expires_at)?;
                Ok(true)
            })
            .with_op(OP_CREATE_SESSION)?;
        if !created {
            return Err(SessionError::AlreadyExists(key.to_string()));
        }

        let (app_state, user_state) = self
            .client
            .with_conn(ctx, |conn| self.scoped_state(conn, &user, now))
            .with_op(OP_CREATE_SESSION)?;
        let mut merged = state.clone();
        merge_scoped(&mut merged, &app_state, &user_state);
        debug!(session = %key, "session created");
        Ok(Session::from_snapshot(
            key.clone(),
            SessionSnapshot {
                state: merged,
                created_at: now,
                updated_at: now,
                ..SessionSnapshot::default()
            },
        ))
    }

    /// Load an active session, or `None`. Extends the session TTL as a
    /// side effect; a failed refresh is only logged.
    pub fn load_session(&self, ctx: &Context, key: &Key, opts: &Options) -> Result<Option<Session>> {
        key.check_session_key()?;
        let now = Utc::now();
        self.client
            .with_conn(ctx, |conn| {
                let Some(row) = self.states().get_active(conn, key, now)? else {
                    return Ok(None);
                };
                let (app_state, user_state) = self.scoped_state(conn, &key.user_key(), now)?;
                let session = self.compose(conn, key, row, &app_state, &user_state, opts, now)?;

                if let Some(expires_at) = expires_after(now, self.policy.session_ttl) {
                    if let Err(e) = self.states().refresh_ttl(conn, key, now, expires_at) {
                        warn!(session = %key, error = %e, "failed to refresh session ttl");
                    }
                }
                Ok(Some(session))
            })
            .with_op(OP_GET_SESSION)
    }

    /// Every active session of `user`, most recently updated first.
    pub fn list_sessions(&self, ctx: &Context, user: &UserKey, opts: &Options) -> Result<Vec<Session>> {
        user.check_user_key()?;
        let now = Utc::now();
        self.client
            .with_conn(ctx, |conn| {
                let rows = self.states().list_active(conn, user, now)?;
                if rows.is_empty() {
                    return Ok(Vec::new());
                }
                let (app_state, user_state) = self.scoped_state(conn, user, now)?;
                rows.into_iter()
                    .map(|row| {
                        let key = Key::new(user.app_name.clone(), user.user_id.clone(), row.session_id.clone());
                        self.compose(conn, &key, row, &app_state, &user_state, opts, now)
                    })
                    .collect()
            })
            .with_op(OP_LIST_SESSIONS)
    }

    /// Delete the session and everything attached to it in one transaction.
    pub fn delete_session(&self, ctx: &Context, key: &Key) -> Result<()> {
        key.check_session_key()?;
        let now = Utc::now();
        let soft = self.policy.soft_delete;
        let removed = self
            .client
            .transaction(ctx, |tx| {
                let states = self.states().delete(tx, key, soft, now)?;
                let _ = self.summaries().delete(tx, key, soft, now)?;
                let _ = self.events().delete(tx, key, soft, now)?;
                let _ = self.tracks().delete(tx, key, soft, now)?;
                Ok(states)
            })
            .with_op(OP_DELETE_SESSION)?;
        debug!(session = %key, soft, removed, "session deleted");
        Ok(())
    }

    fn scoped_state(
        &self,
        conn: &Connection,
        user: &UserKey,
        now: DateTime<Utc>,
    ) -> crate::errors::Result<(StateMap, StateMap)> {
        let app_state = self.app_states().list(conn, &user.app_name, now)?;
        let user_state = self.user_states().list(conn, user, now)?;
        Ok((app_state, user_state))
    }

    /// Events created after this are visible: the caller's floor, else the
    /// session TTL window.
    fn event_floor(&self, opts: &Options, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if opts.event_time.is_some() {
            return opts.event_time;
        }
        if self.policy.session_ttl.is_zero() {
            return None;
        }
        TimeDelta::from_std(self.policy.session_ttl)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
    }

    fn event_window(&self, opts: &Options) -> usize {
        if opts.event_num > 0 {
            opts.event_num
        } else {
            self.policy.event_limit
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn compose(
        &self,
        conn: &Connection,
        key: &Key,
        row: SessionStateRow,
        app_state: &StateMap,
        user_state: &StateMap,
        opts: &Options,
        now: DateTime<Utc>,
    ) -> crate::errors::Result<Session> {
        let floor = self.event_floor(opts, now);
        let limit = self.event_window(opts);
        let events = self.events().list(conn, key, floor, limit, now)?;

        let mut tracks = HashMap::new();
        match tracks_from_state(&row.state) {
            Ok(names) => {
                for track in names {
                    let events = self.tracks().list(conn, key, &track, floor, limit, now)?;
                    let _ = tracks.insert(track.clone(), TrackEvents { track, events });
                }
            }
            Err(e) => warn!(session = %key, error = %e, "unreadable track index, skipping tracks"),
        }

        let summaries = self.summaries().list(conn, key)?;
        let mut state = row.state;
        merge_scoped(&mut state, app_state, user_state);
        Ok(Session::from_snapshot(
            key.clone(),
            SessionSnapshot {
                state,
                events,
                tracks,
                summaries,
                created_at: row.created_at,
                updated_at: row.updated_at,
            },
        ))
    }

    // ── Appends ─────────────────────────────────────────────────────────

    /// Persist one event: merge its state delta into the stored state,
    /// extend the session expiry, insert the event row if it carries
    /// content, and enforce the event cap. One transaction.
    pub fn add_event(&self, ctx: &Context, key: &Key, event: &Event) -> Result<()> {
        let now = Utc::now();
        let expires_at = expires_after(now, self.policy.session_ttl);
        let persist_row = event.is_persistable();
        let found = self
            .client
            .transaction(ctx, |tx| {
                let Some(row) = self.states().get_undeleted(tx, key)? else {
                    return Ok(false);
                };
                if row.is_expired(now) {
                    info!(app = %key.app_name, user = %key.user_id, session = %key.session_id, "appending event to expired session, extending expiry");
                }
                let mut state = row.state;
                for (k, v) in &event.state_delta {
                    let _ = state.insert(k.clone(), v.clone());
                }
                let _ = self.states().update_state(tx, key, &state, now, expires_at)?;
                if persist_row {
                    let _ = self.events().insert(tx, key, event, now)?;
                    if self.policy.event_limit > 0 {
                        let evicted =
                            self.events()
                                .enforce_limit(tx, key, self.policy.event_limit, self.policy.soft_delete, now)?;
                        if evicted > 0 {
                            debug!(session = %key, evicted, "event limit enforced");
                        }
                    }
                }
                Ok(true)
            })
            .with_op(OP_APPEND_EVENT)?;
        if !found {
            return Err(not_found(key));
        }
        Ok(())
    }

    /// Persist one track event and register its track in the stored state.
    pub fn add_track_event(&self, ctx: &Context, key: &Key, event: &TrackEvent) -> Result<()> {
        if event.track.is_empty() {
            return Err(SessionError::InvalidArgument("track is required".into()));
        }
        let now = Utc::now();
        let expires_at = expires_after(now, self.policy.session_ttl);
        let found = self
            .client
            .transaction(ctx, |tx| {
                let Some(row) = self.states().get_undeleted(tx, key)? else {
                    return Ok(false);
                };
                let mut state = row.state;
                let _ = ensure_track(&mut state, &event.track)?;
                let _ = self.states().update_state(tx, key, &state, now, expires_at)?;
                self.tracks().insert(tx, key, event, now, expires_at)?;
                Ok(true)
            })
            .with_op(OP_APPEND_TRACK_EVENT)?;
        if !found {
            return Err(not_found(key));
        }
        Ok(())
    }

    // ── State ───────────────────────────────────────────────────────────

    /// Merge `state` into the session-scoped state. `app:` and `user:`
    /// keys are rejected.
    pub fn update_session_state(&self, ctx: &Context, key: &Key, state: &StateMap) -> Result<()> {
        key.check_session_key()?;
        if let Some(bad) = state.keys().find(|k| is_scoped_key(k)) {
            return Err(SessionError::InvalidArgument(format!(
                "session state key {bad:?} must not use the app: or user: prefix"
            )));
        }
        let now = Utc::now();
        let expires_at = expires_after(now, self.policy.session_ttl);
        let found = self
            .client
            .transaction(ctx, |tx| {
                let Some(row) = self.states().get_undeleted(tx, key)? else {
                    return Ok(false);
                };
                let mut merged = row.state;
                merged.extend(state.iter().map(|(k, v)| (k.clone(), v.clone())));
                let _ = self.states().update_state(tx, key, &merged, now, expires_at)?;
                Ok(true)
            })
            .with_op(OP_UPDATE_SESSION_STATE)?;
        if !found {
            return Err(not_found(key));
        }
        Ok(())
    }

    /// Upsert app-scoped keys (an `app:` prefix is stripped).
    pub fn update_app_state(&self, ctx: &Context, app_name: &str, state: &StateMap) -> Result<()> {
        if app_name.is_empty() {
            return Err(KeyError::MissingAppName.into());
        }
        let entries = normalize_keys(state, strip_app_prefix)?;
        let now = Utc::now();
        let expires_at = expires_after(now, self.policy.app_state_ttl);
        self.client
            .transaction(ctx, |tx| {
                for (k, v) in &entries {
                    self.app_states().upsert(tx, app_name, k, v, now, expires_at)?;
                }
                Ok(())
            })
            .with_op(OP_UPDATE_APP_STATE)
    }

    /// Active app-scoped state, keys without prefix.
    pub fn list_app_states(&self, ctx: &Context, app_name: &str) -> Result<StateMap> {
        if app_name.is_empty() {
            return Err(KeyError::MissingAppName.into());
        }
        self.client
            .with_conn(ctx, |conn| self.app_states().list(conn, app_name, Utc::now()))
            .with_op(OP_LIST_APP_STATES)
    }

    /// Delete one app-scoped key.
    pub fn delete_app_state(&self, ctx: &Context, app_name: &str, key: &str) -> Result<()> {
        if app_name.is_empty() {
            return Err(KeyError::MissingAppName.into());
        }
        let key = required_key(strip_app_prefix(key))?;
        let _ = self
            .client
            .with_conn(ctx, |conn| {
                self.app_states()
                    .delete(conn, app_name, key, self.policy.soft_delete, Utc::now())
            })
            .with_op(OP_DELETE_APP_STATE)?;
        Ok(())
    }

    /// Upsert user-scoped keys (a `user:` prefix is stripped).
    pub fn update_user_state(&self, ctx: &Context, user: &UserKey, state: &StateMap) -> Result<()> {
        user.check_user_key()?;
        let entries = normalize_keys(state, strip_user_prefix)?;
        let now = Utc::now();
        let expires_at = expires_after(now, self.policy.user_state_ttl);
        self.client
            .transaction(ctx, |tx| {
                for (k, v) in &entries {
                    self.user_states().upsert(tx, user, k, v, now, expires_at)?;
                }
                Ok(())
            })
            .with_op(OP_UPDATE_USER_STATE)
    }

    /// Active user-scoped state, keys without prefix.
    pub fn list_user_states(&self, ctx: &Context, user: &UserKey) -> Result<StateMap> {
        user.check_user_key()?;
        self.client
            .with_conn(ctx, |conn| self.user_states().list(conn, user, Utc::now()))
            .with_op(OP_LIST_USER_STATES)
    }

    /// Delete one user-scoped key.
    pub fn delete_user_state(&self, ctx: &Context, user: &UserKey, key: &str) -> Result<()> {
        user.check_user_key()?;
        let key = required_key(strip_user_prefix(key))?;
        let _ = self
            .client
            .with_conn(ctx, |conn| {
                self.user_states()
                    .delete(conn, user, key, self.policy.soft_delete, Utc::now())
            })
            .with_op(OP_DELETE_USER_STATE)?;
        Ok(())
    }

    // ── Expiry ──────────────────────────────────────────────────────────

    /// Sweep expired rows in one transaction. `scope` limits the sweep to
    /// one user and skips app state.
    pub fn cleanup_expired(&self, ctx: &Context, scope: Option<&UserKey>) -> Result<SweepCounts> {
        let policy = self.policy.sweep_policy();
        if policy.is_empty() {
            return Ok(SweepCounts::default());
        }
        let now = Utc::now();
        let counts = self
            .client
            .transaction(ctx, |tx| {
                ExpiryRepo::new(&self.tables).sweep(tx, policy, scope, self.policy.soft_delete, now)
            })
            .with_op(OP_CLEANUP)?;
        if counts.total() > 0 {
            info!(
                session_states = counts.session_states,
                events = counts.events,
                track_events = counts.track_events,
                summaries = counts.summaries,
                app_states = counts.app_states,
                user_states = counts.user_states,
                soft = self.policy.soft_delete,
                "expired rows cleaned up"
            );
        }
        Ok(counts)
    }

    // ── Summaries ───────────────────────────────────────────────────────

    /// Summarize `session` for `filter_key` and persist the result. A no-op
    /// without a summarizer or when the summarizer skips.
    pub async fn create_session_summary(
        &self,
        ctx: &Context,
        session: &Session,
        filter_key: &str,
        force: bool,
    ) -> Result<()> {
        let Some(summarizer) = self.summarizer.as_ref() else {
            return Ok(());
        };
        session.key().check_session_key()?;
        let updated = summarize_session(ctx, summarizer.as_ref(), session, filter_key, force).await?;
        if !updated {
            return Ok(());
        }
        let Some(summary) = session.summary(filter_key) else {
            return Ok(());
        };
        self.save_summary(ctx, session.key(), filter_key, &summary)?;
        debug!(session = %session.key(), filter_key, "summary persisted");
        Ok(())
    }

    /// Upsert one summary row.
    pub fn save_summary(&self, ctx: &Context, key: &Key, filter_key: &str, summary: &Summary) -> Result<()> {
        self.client
            .with_conn(ctx, |conn| self.summaries().upsert(conn, key, filter_key, summary, Utc::now()))
            .with_op(OP_SAVE_SUMMARY)
    }

    /// The stored summary for `filter_key`.
    pub fn load_summary(&self, ctx: &Context, key: &Key, filter_key: &str) -> Result<Option<Summary>> {
        self.client
            .with_conn(ctx, |conn| self.summaries().get(conn, key, filter_key))
            .with_op(OP_GET_SUMMARY)
    }
}

fn required_key(key: &str) -> Result<&str> {
    if key.is_empty() {
        return Err(SessionError::InvalidArgument("state key is required".into()));
    }
    Ok(key)
}

fn normalize_keys(state: &StateMap, strip: fn(&str) -> &str) -> Result<Vec<(String, Vec<u8>)>> {
    state
        .iter()
        .map(|(k, v)| Ok((required_key(strip(k))?.to_string(), v.clone())))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::connection::{ConnectionConfig, new_file};
    use crate::sqlite::schema::init_schema;
    use assert_matches::assert_matches;
    use strata_core::{ErrorKind, Message, Response};

    fn store(policy: StorePolicy) -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = new_file(dir.path().join("store.db"), &ConnectionConfig::default()).unwrap();
        let names = TableNames::default();
        init_schema(&pool.get().unwrap(), &names).unwrap();
        (dir, SessionStore::new(StorageClient::new(pool), names, policy, None))
    }

    fn said(text: &str) -> Event {
        Event::from_response("assistant", Response::from_message(Message::assistant(text)))
    }

    fn bg() -> Context {
        Context::background()
    }

    #[test]
    fn expires_after_handles_zero_and_overflow() {
        let now = Utc::now();
        assert!(expires_after(now, Duration::ZERO).is_none());
        assert_eq!(
            expires_after(now, Duration::from_secs(60)),
            Some(now + TimeDelta::seconds(60))
        );
        assert!(expires_after(now, Duration::from_secs(u64::MAX)).is_none());
    }

    #[test]
    fn create_twice_is_already_exists() {
        let (_dir, store) = store(StorePolicy::default());
        let key = Key::new("a", "u", "s");
        let _ = store.create_session(&bg(), &key, &StateMap::new()).unwrap();
        let err = store.create_session(&bg(), &key, &StateMap::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn create_requires_full_key() {
        let (_dir, store) = store(StorePolicy::default());
        let err = store
            .create_session(&bg(), &Key::new("a", "u", ""), &StateMap::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyInvalid);
    }

    #[test]
    fn append_to_missing_session_is_not_found() {
        let (_dir, store) = store(StorePolicy::default());
        let err = store
            .add_event(&bg(), &Key::new("a", "u", "ghost"), &said("hi"))
            .unwrap_err();
        assert_matches!(err, SessionError::NotFound(_));
    }

    #[test]
    fn empty_events_merge_state_without_rows() {
        let (_dir, store) = store(StorePolicy::default());
        let key = Key::new("a", "u", "s");
        let _ = store.create_session(&bg(), &key, &StateMap::new()).unwrap();
        let event = Event::new("assistant").with_state_delta("step", b"2".to_vec());
        store.add_event(&bg(), &key, &event).unwrap();

        let loaded = store.load_session(&bg(), &key, &Options::default()).unwrap().unwrap();
        assert_eq!(loaded.event_count(), 0);
        assert_eq!(loaded.get_state("step"), Some(b"2".to_vec()));
    }

    #[test]
    fn session_state_rejects_scoped_keys() {
        let (_dir, store) = store(StorePolicy::default());
        let key = Key::new("a", "u", "s");
        let _ = store.create_session(&bg(), &key, &StateMap::new()).unwrap();
        let bad = StateMap::from([("app:k".to_string(), b"v".to_vec())]);
        assert_eq!(
            store.update_session_state(&bg(), &key, &bad).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );

        let good = StateMap::from([("k".to_string(), b"v".to_vec())]);
        store.update_session_state(&bg(), &key, &good).unwrap();
        let loaded = store.load_session(&bg(), &key, &Options::default()).unwrap().unwrap();
        assert_eq!(loaded.get_state("k"), Some(b"v".to_vec()));
    }

    #[test]
    fn track_events_round_trip_through_state_index() {
        let (_dir, store) = store(StorePolicy::default());
        let key = Key::new("a", "u", "s");
        let _ = store.create_session(&bg(), &key, &StateMap::new()).unwrap();
        for n in 0..3 {
            store
                .add_track_event(&bg(), &key, &TrackEvent::new("ag-ui", serde_json::json!({ "n": n })))
                .unwrap();
        }
        let loaded = store.load_session(&bg(), &key, &Options::default()).unwrap().unwrap();
        let track = loaded.track_events("ag-ui").unwrap();
        assert_eq!(track.events.len(), 3);
        assert_eq!(track.events[2].payload["n"], 2);

        let err = store
            .add_track_event(&bg(), &key, &TrackEvent::new("", serde_json::json!({})))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn app_and_user_state_keys_are_normalized() {
        let (_dir, store) = store(StorePolicy::default());
        let user = UserKey::new("a", "u");
        store
            .update_app_state(&bg(), "a", &StateMap::from([("app:mode".to_string(), b"x".to_vec())]))
            .unwrap();
        store
            .update_user_state(&bg(), &user, &StateMap::from([("user:lang".to_string(), b"en".to_vec())]))
            .unwrap();
        assert!(store.list_app_states(&bg(), "a").unwrap().contains_key("mode"));
        assert!(store.list_user_states(&bg(), &user).unwrap().contains_key("lang"));

        store.delete_app_state(&bg(), "a", "app:mode").unwrap();
        store.delete_user_state(&bg(), &user, "lang").unwrap();
        assert!(store.list_app_states(&bg(), "a").unwrap().is_empty());
        assert!(store.list_user_states(&bg(), &user).unwrap().is_empty());

        assert_eq!(
            store.delete_app_state(&bg(), "a", "app:").unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            store.update_app_state(&bg(), "", &StateMap::new()).unwrap_err().kind(),
            ErrorKind::KeyInvalid
        );
    }

    #[test]
    fn cleanup_without_ttls_is_a_no_op() {
        let (_dir, store) = store(StorePolicy::default());
        assert_eq!(store.cleanup_expired(&bg(), None).unwrap(), SweepCounts::default());
    }

    #[test]
    fn closed_client_surfaces_closed() {
        let (_dir, store) = store(StorePolicy::default());
        let _ = store.client().close();
        assert_eq!(
            store.list_app_states(&bg(), "a").unwrap_err().kind(),
            ErrorKind::Closed
        );
    }

    #[test]
    fn locked_database_add_event_ends_at_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let config = ConnectionConfig {
            busy_timeout_ms: 3000,
            ..ConnectionConfig::default()
        };
        let pool = new_file(&path, &config).unwrap();
        let names = TableNames::default();
        init_schema(&pool.get().unwrap(), &names).unwrap();
        let store = SessionStore::new(StorageClient::new(pool), names, StorePolicy::default(), None);
        let key = Key::new("a", "u", "s");
        let _ = store.create_session(&bg(), &key, &StateMap::new()).unwrap();

        let locker = Connection::open(&path).unwrap();
        locker.execute_batch("BEGIN IMMEDIATE").unwrap();
        let ctx = Context::background().with_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = store.add_event(&ctx, &key, &said("late")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContextCancelled);
        assert!(started.elapsed() < Duration::from_secs(2), "waited {:?}", started.elapsed());

        locker.execute_batch("ROLLBACK").unwrap();
        store.add_event(&bg(), &key, &said("on time")).unwrap();
        let loaded = store.load_session(&bg(), &key, &Options::default()).unwrap().unwrap();
        assert_eq!(loaded.event_count(), 1);
    }
}
