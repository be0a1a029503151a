//! Database row types and column codecs.
//!
//! These are the raw row shapes, not the public API types. Conversion to
//! [`Session`](strata_core::Session) parts happens in the repositories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_core::StateMap;
use strata_core::state::base64_map;
use strata_core::time::parse_ts;

use crate::errors::{Result, StorageError};

/// JSON document stored in `session_states.state`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    /// Session-scoped state with base64 values.
    #[serde(with = "base64_map", default)]
    pub state: StateMap,
}

impl StateDocument {
    /// Encode for storage.
    pub fn encode(state: &StateMap) -> Result<String> {
        let doc = Self {
            state: state.clone(),
        };
        Ok(serde_json::to_string(&doc)?)
    }

    /// Decode a stored document. `NULL` and empty text yield an empty map.
    pub fn decode(raw: Option<&str>) -> Result<StateMap> {
        match raw {
            Some(text) if !text.is_empty() => Ok(serde_json::from_str::<Self>(text)?.state),
            _ => Ok(StateMap::new()),
        }
    }
}

/// Raw row from `session_states`.
#[derive(Clone, Debug)]
pub struct SessionStateRow {
    /// Session id.
    pub session_id: String,
    /// Decoded session-scoped state.
    pub state: StateMap,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Expiry (null = never).
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionStateRow {
    /// Whether the row has expired as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

/// Parse a timestamp column.
pub fn parse_column(raw: &str) -> Result<DateTime<Utc>> {
    parse_ts(raw).map_err(|source| StorageError::Timestamp {
        value: raw.to_string(),
        source,
    })
}

/// Parse a nullable timestamp column.
pub fn parse_opt_column(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(parse_column).transpose()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
