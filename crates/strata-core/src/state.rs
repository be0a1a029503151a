//! Session state maps and scope prefixes.
//!
//! State values are opaque byte payloads. When a session is read, app-scoped
//! entries appear under `app:` and user-scoped entries under `user:`; writes
//! strip those prefixes before persisting to the owning table. `temp:` keys
//! are session-scoped scratch space.

use std::collections::HashMap;

/// Mapping from state key to opaque payload.
pub type StateMap = HashMap<String, Vec<u8>>;

/// Prefix for app-scoped keys.
pub const APP_PREFIX: &str = "app:";
/// Prefix for user-scoped keys.
pub const USER_PREFIX: &str = "user:";
/// Prefix for ephemeral session-scoped keys.
pub const TEMP_PREFIX: &str = "temp:";
/// Reserved session-state key listing the session's tracks (JSON array).
pub const TRACKS_KEY: &str = "tracks";

/// Strip the `app:` prefix if present.
pub fn strip_app_prefix(key: &str) -> &str {
    key.strip_prefix(APP_PREFIX).unwrap_or(key)
}

/// Strip the `user:` prefix if present.
pub fn strip_user_prefix(key: &str) -> &str {
    key.strip_prefix(USER_PREFIX).unwrap_or(key)
}

/// Whether the key belongs to the app or user scope.
pub fn is_scoped_key(key: &str) -> bool {
    key.starts_with(APP_PREFIX) || key.starts_with(USER_PREFIX)
}

/// Merge app and user state into `target` under their scope prefixes.
pub fn merge_scoped(target: &mut StateMap, app_state: &StateMap, user_state: &StateMap) {
    for (k, v) in app_state {
        let _ = target.insert(format!("{APP_PREFIX}{k}"), v.clone());
    }
    for (k, v) in user_state {
        let _ = target.insert(format!("{USER_PREFIX}{k}"), v.clone());
    }
}

/// Track names recorded in a state map.
pub fn tracks_from_state(state: &StateMap) -> Result<Vec<String>, serde_json::Error> {
    match state.get(TRACKS_KEY) {
        Some(raw) if !raw.is_empty() => serde_json::from_slice(raw),
        _ => Ok(Vec::new()),
    }
}

/// Record `track` in the state's track index. Returns `true` if it was added.
pub fn ensure_track(state: &mut StateMap, track: &str) -> Result<bool, serde_json::Error> {
    let mut tracks = tracks_from_state(state)?;
    if tracks.iter().any(|t| t == track) {
        return Ok(false);
    }
    tracks.push(track.to_string());
    let _ = state.insert(TRACKS_KEY.to_string(), serde_json::to_vec(&tracks)?);
    Ok(true)
}

/// Serde adapter encoding [`StateMap`] values as base64 strings.
///
/// Use with `#[serde(with = "strata_core::state::base64_map")]`.
pub mod base64_map {
    use std::collections::HashMap;

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::StateMap;

    /// Serialize a state map with base64-encoded values.
    pub fn serialize<S: Serializer>(map: &StateMap, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(map.iter().map(|(k, v)| (k, STANDARD.encode(v))))
    }

    /// Deserialize a state map with base64-encoded values. `null` yields an empty map.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<StateMap, D::Error> {
        let raw = Option::<HashMap<String, String>>::deserialize(deserializer)?.unwrap_or_default();
        raw.into_iter()
            .map(|(k, v)| {
                STANDARD
                    .decode(v.as_bytes())
                    .map(|bytes| (k, bytes))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
