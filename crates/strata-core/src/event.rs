//! Conversational events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::response::Response;
use crate::state::{StateMap, base64_map};

/// Separator for hierarchical filter keys (`"agent/sub/tool"`).
pub const FILTER_KEY_DELIMITER: char = '/';

/// An agent-produced record appended to a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event id.
    pub id: String,
    /// Request that produced the event.
    #[serde(default)]
    pub request_id: String,
    /// Invocation within the request.
    #[serde(default)]
    pub invocation_id: String,
    /// Author (agent name, `"user"`, `"system"`).
    #[serde(default)]
    pub author: String,
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
    /// Model response, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Response>,
    /// State changes carried by this event.
    #[serde(default, with = "base64_map", skip_serializing_if = "StateMap::is_empty")]
    pub state_delta: StateMap,
    /// Branch this event belongs to; empty means the whole session.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filter_key: String,
    /// Opaque upstream payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Event {
    /// A new event with a fresh id, stamped now.
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_id: String::new(),
            invocation_id: String::new(),
            author: author.into(),
            timestamp: Utc::now(),
            response: None,
            state_delta: StateMap::new(),
            filter_key: String::new(),
            payload: None,
        }
    }

    /// A new event carrying `response`.
    pub fn from_response(author: impl Into<String>, response: Response) -> Self {
        Self {
            response: Some(response),
            ..Self::new(author)
        }
    }

    /// Set the request id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Set the filter key.
    #[must_use]
    pub fn with_filter_key(mut self, filter_key: impl Into<String>) -> Self {
        self.filter_key = filter_key.into();
        self
    }

    /// Add a state delta entry.
    #[must_use]
    pub fn with_state_delta(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        let _ = self.state_delta.insert(key.into(), value.into());
        self
    }

    /// Set the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Whether the response is a streaming chunk.
    pub fn is_partial(&self) -> bool {
        self.response.as_ref().is_some_and(|r| r.is_partial)
    }

    /// Whether the response carries storable content.
    pub fn is_valid_content(&self) -> bool {
        self.response.as_ref().is_some_and(Response::is_valid_content)
    }

    /// Whether any response choice was authored by the user.
    pub fn is_user_message(&self) -> bool {
        self.response.as_ref().is_some_and(Response::is_user_message)
    }

    /// Whether this event is appended to the event log: it has a response
    /// that is neither partial nor empty.
    pub fn is_persistable(&self) -> bool {
        self.response.is_some() && !self.is_partial() && self.is_valid_content()
    }

    /// Whether the event belongs to the branch named by `filter_key`.
    ///
    /// Matches when either key is empty, the keys are equal, or one is a
    /// `/`-delimited ancestor of the other.
    pub fn filter(&self, filter_key: &str) -> bool {
        if filter_key.is_empty() || self.filter_key.is_empty() {
            return true;
        }
        is_path_prefix(filter_key, &self.filter_key) || is_path_prefix(&self.filter_key, filter_key)
    }
}

fn is_path_prefix(prefix: &str, key: &str) -> bool {
    match key.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with(FILTER_KEY_DELIMITER),
        None => false,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
