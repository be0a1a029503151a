//! The `Session` aggregate.
//!
//! A session owns four sub-collections (state, events, tracks, summaries),
//! each behind its own read-write lock so state can be read while events are
//! appended. The shard [`hash`](Session::hash) is computed once from the key
//! and never changes.
//!
//! Mutators are safe to call concurrently. `updated_at` only moves forward.
//! Code that holds more than one of the locks takes them in field order:
//! state, events, tracks, summaries, then `updated_at`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::event::Event;
use crate::hash::session_hash;
use crate::key::Key;
use crate::state::{self, StateMap};

/// Filter key denoting the full-session summary.
pub const SUMMARY_FILTER_KEY_ALL_CONTENTS: &str = "";

/// Track tag (e.g. `"ag-ui"`).
pub type Track = String;

/// One event on a protocol-specific track.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackEvent {
    /// Track tag.
    pub track: Track,
    /// Opaque payload.
    pub payload: serde_json::Value,
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
}

impl TrackEvent {
    /// A track event stamped now.
    pub fn new(track: impl Into<Track>, payload: serde_json::Value) -> Self {
        Self {
            track: track.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Ordered events on one track.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackEvents {
    /// Track tag.
    pub track: Track,
    /// Events in chronological order.
    pub events: Vec<TrackEvent>,
}

/// A generated summary for one filter key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Summary text.
    pub summary: String,
    /// Extracted topics.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Timestamp of the latest event covered by the summary.
    pub updated_at: DateTime<Utc>,
    /// Copied from another key and not yet persisted.
    #[serde(skip)]
    pub pending_persist: bool,
}

/// Read options controlling how many events are kept.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Options {
    /// Keep at most this many events (0 = unbounded).
    pub event_num: usize,
    /// Drop events strictly before this time.
    pub event_time: Option<DateTime<Utc>>,
}

impl Options {
    /// Set the event count limit.
    #[must_use]
    pub fn with_event_num(mut self, n: usize) -> Self {
        self.event_num = n;
        self
    }

    /// Set the event time floor.
    #[must_use]
    pub fn with_event_time(mut self, t: DateTime<Utc>) -> Self {
        self.event_time = Some(t);
        self
    }
}

/// Options for summary lookups.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SummaryOptions {
    /// Requested filter key; empty selects the full-session summary.
    pub filter_key: String,
}

impl SummaryOptions {
    /// Options selecting `filter_key`.
    pub fn with_filter_key(filter_key: impl Into<String>) -> Self {
        Self {
            filter_key: filter_key.into(),
        }
    }
}

/// Plain-data copy of a session, used to build and export aggregates.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session state.
    #[serde(with = "state::base64_map", default)]
    pub state: StateMap,
    /// Events in chronological order.
    #[serde(default)]
    pub events: Vec<Event>,
    /// Track events by tag.
    #[serde(default)]
    pub tracks: HashMap<Track, TrackEvents>,
    /// Summaries by filter key.
    #[serde(default)]
    pub summaries: HashMap<String, Summary>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

/// The `(app, user, session)` aggregate.
#[derive(Debug)]
pub struct Session {
    key: Key,
    hash: u32,
    created_at: DateTime<Utc>,
    state: RwLock<StateMap>,
    events: RwLock<Vec<Event>>,
    tracks: RwLock<HashMap<Track, TrackEvents>>,
    summaries: RwLock<HashMap<String, Summary>>,
    updated_at: RwLock<DateTime<Utc>>,
}

impl Session {
    /// An empty session created now.
    pub fn new(key: Key) -> Self {
        let now = Utc::now();
        Self::from_snapshot(
            key,
            SessionSnapshot {
                created_at: now,
                updated_at: now,
                ..SessionSnapshot::default()
            },
        )
    }

    /// Build a session from stored parts.
    pub fn from_snapshot(key: Key, snapshot: SessionSnapshot) -> Self {
        let hash = session_hash(&key.app_name, &key.user_id, &key.session_id);
        let updated_at = snapshot.updated_at.max(snapshot.created_at);
        Self {
            key,
            hash,
            created_at: snapshot.created_at,
            state: RwLock::new(snapshot.state),
            events: RwLock::new(snapshot.events),
            tracks: RwLock::new(snapshot.tracks),
            summaries: RwLock::new(snapshot.summaries),
            updated_at: RwLock::new(updated_at),
        }
    }

    /// Deep copy of every sub-collection, taken with all read locks held
    /// so no mutator is observed half-applied.
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.read();
        let events = self.events.read();
        let tracks = self.tracks.read();
        let summaries = self.summaries.read();
        let updated_at = self.updated_at.read();
        SessionSnapshot {
            state: state.clone(),
            events: events.clone(),
            tracks: tracks.clone(),
            summaries: summaries.clone(),
            created_at: self.created_at,
            updated_at: *updated_at,
        }
    }

    // ── Identity ────────────────────────────────────────────────────────

    /// Session key.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Session id.
    pub fn id(&self) -> &str {
        &self.key.session_id
    }

    /// App name.
    pub fn app_name(&self) -> &str {
        &self.key.app_name
    }

    /// User id.
    pub fn user_id(&self) -> &str {
        &self.key.user_id
    }

    /// Shard routing hash of `"app:user:session"`.
    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last mutation time.
    pub fn updated_at(&self) -> DateTime<Utc> {
        *self.updated_at.read()
    }

    /// Advance `updated_at` to now (never backwards).
    pub fn touch(&self) {
        advance(&mut self.updated_at.write());
    }

    // ── State ───────────────────────────────────────────────────────────

    /// Copy of the state map.
    pub fn state(&self) -> StateMap {
        self.state.read().clone()
    }

    /// One state value.
    pub fn get_state(&self, key: &str) -> Option<Vec<u8>> {
        self.state.read().get(key).cloned()
    }

    /// Set one state value.
    pub fn set_state(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        let _ = self.state.write().insert(key.into(), value.into());
        self.touch();
    }

    /// Merge the event's state delta into the state (last write wins).
    pub fn apply_event_state_delta(&self, event: &Event) {
        if event.state_delta.is_empty() {
            return;
        }
        merge_delta(&mut self.state.write(), event);
    }

    // ── Events ──────────────────────────────────────────────────────────

    /// Copy of the event list.
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Number of events held in memory.
    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }

    /// Record an event produced for this session.
    ///
    /// Persistable events are appended and the list re-filtered with `opts`;
    /// the state delta is merged regardless.
    pub fn update_user_session(&self, event: &Event, opts: &Options) {
        let mut state = self.state.write();
        let mut events = self.events.write();
        if event.is_persistable() {
            events.push(event.clone());
            filter_events(&mut events, opts);
        }
        merge_delta(&mut state, event);
        advance(&mut self.updated_at.write());
    }

    /// Apply time and count filters, then make the list start with a user
    /// message (borrowing the most recent user message from before the
    /// window if needed). Yields an empty list when no user message exists.
    pub fn apply_event_filtering(&self, opts: &Options) {
        filter_events(&mut self.events.write(), opts);
    }

    /// Drop leading non-user events; clear the list if no user event exists.
    pub fn ensure_event_start_with_user(&self) {
        let mut events = self.events.write();
        match events.iter().position(Event::is_user_message) {
            Some(start) => {
                let _ = events.drain(..start);
            }
            None => {
                if !events.is_empty() {
                    debug!(session = %self.key, dropped = events.len(), "no user event, clearing events");
                }
                events.clear();
            }
        }
    }

    // ── Tracks ──────────────────────────────────────────────────────────

    /// Append a track event, registering the track in the state index.
    pub fn append_track_event(&self, event: TrackEvent) -> Result<(), serde_json::Error> {
        let mut state = self.state.write();
        let mut tracks = self.tracks.write();
        let _ = state::ensure_track(&mut state, &event.track)?;
        let entry = tracks
            .entry(event.track.clone())
            .or_insert_with(|| TrackEvents {
                track: event.track.clone(),
                events: Vec::new(),
            });
        entry.events.push(event);
        advance(&mut self.updated_at.write());
        Ok(())
    }

    /// Copy of one track's events.
    pub fn track_events(&self, track: &str) -> Option<TrackEvents> {
        self.tracks.read().get(track).cloned()
    }

    /// Copy of all tracks.
    pub fn tracks(&self) -> HashMap<Track, TrackEvents> {
        self.tracks.read().clone()
    }

    // ── Summaries ───────────────────────────────────────────────────────

    /// Copy of all summaries.
    pub fn summaries(&self) -> HashMap<String, Summary> {
        self.summaries.read().clone()
    }

    /// One summary by filter key.
    pub fn summary(&self, filter_key: &str) -> Option<Summary> {
        self.summaries.read().get(filter_key).cloned()
    }

    /// Insert or replace a summary.
    pub fn set_summary(&self, filter_key: impl Into<String>, summary: Summary) {
        let _ = self.summaries.write().insert(filter_key.into(), summary);
    }

    /// Mutate the summary map under its write lock.
    pub fn update_summaries<R>(&self, f: impl FnOnce(&mut HashMap<String, Summary>) -> R) -> R {
        f(&mut self.summaries.write())
    }
}

impl Clone for Session {
    fn clone(&self) -> Self {
        Self::from_snapshot(self.key.clone(), self.snapshot())
    }
}

fn advance(updated_at: &mut DateTime<Utc>) {
    let now = Utc::now();
    if now > *updated_at {
        *updated_at = now;
    }
}

fn merge_delta(state: &mut StateMap, event: &Event) {
    for (k, v) in &event.state_delta {
        let _ = state.insert(k.clone(), v.clone());
    }
}

fn filter_events(events: &mut Vec<Event>, opts: &Options) {
    let original = events.clone();

    if let Some(since) = opts.event_time {
        match events.iter().position(|e| e.timestamp >= since) {
            Some(start) => {
                let _ = events.drain(..start);
            }
            None => events.clear(),
        }
    }

    if opts.event_num > 0 && events.len() > opts.event_num {
        let excess = events.len() - opts.event_num;
        let _ = events.drain(..excess);
    }

    if let Some(start) = events.iter().position(Event::is_user_message) {
        let _ = events.drain(..start);
        return;
    }

    match original.iter().rev().find(|e| e.is_user_message()) {
        Some(user) => events.insert(0, user.clone()),
        None => events.clear(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
