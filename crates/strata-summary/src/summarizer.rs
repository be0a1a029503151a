//! Summarizer contract and helpers shared by implementations.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use strata_core::{Context, Event, Result, Session};

/// State key a summarizer sets on the input session to record the timestamp
/// of the newest event it actually included.
pub const LAST_INCLUDED_TS_KEY: &str = "summary:last_included_ts";

const AUTHOR_UNKNOWN: &str = "unknown";

/// Produces summary text for a session.
///
/// The session handed to [`summarize`](Summarizer::summarize) is a temporary
/// view holding only the events to summarize (optionally preceded by the
/// previous summary as a `system` event), not the stored session.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Whether the session has accumulated enough to be worth summarizing.
    fn should_summarize(&self, session: &Session) -> bool;

    /// Generate summary text. An empty string means "nothing to summarize".
    async fn summarize(&self, ctx: &Context, session: &Session) -> Result<String>;

    /// Replace the prompt template. Empty prompts are ignored.
    fn set_prompt(&self, _prompt: &str) {}

    /// Replace the model by name.
    fn set_model(&self, _model: &str) {}

    /// Descriptive metadata (model name, word limit, check count).
    fn metadata(&self) -> HashMap<String, serde_json::Value> {
        HashMap::new()
    }
}

/// Render events as `author: content` lines, skipping events without text.
pub fn conversation_text(events: &[Event]) -> String {
    events
        .iter()
        .filter_map(|e| {
            let content = e.response.as_ref()?.choices.first()?.message.content.trim();
            if content.is_empty() {
                return None;
            }
            let author = if e.author.is_empty() {
                AUTHOR_UNKNOWN
            } else {
                e.author.as_str()
            };
            Some(format!("{author}: {content}"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Record the newest included event's timestamp on `session`.
pub fn record_last_included_ts(session: &Session, events: &[Event]) {
    if let Some(last) = events.last() {
        let raw = last.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true);
        session.set_state(LAST_INCLUDED_TS_KEY, raw.into_bytes());
    }
}

/// Read the marker written by [`record_last_included_ts`]. Missing or
/// unparsable values yield `None`.
pub fn read_last_included_ts(session: &Session) -> Option<DateTime<Utc>> {
    let raw = session.get_state(LAST_INCLUDED_TS_KEY)?;
    let text = std::str::from_utf8(&raw).ok()?;
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{Key, Message, Response};

    fn said(author: &str, text: &str) -> Event {
        Event::from_response(author, Response::from_message(Message::assistant(text)))
    }

    #[test]
    fn conversation_text_formats_lines() {
        let events = vec![
            said("user", "  hello "),
            said("", "anon"),
            Event::new("agent"),
            said("agent", ""),
            said("agent", "bye"),
        ];
        assert_eq!(
            conversation_text(&events),
            "user: hello\nunknown: anon\nagent: bye"
        );
    }

    #[test]
    fn last_included_ts_roundtrip() {
        let session = Session::new(Key::new("a", "u", "s"));
        assert!(read_last_included_ts(&session).is_none());

        let events = vec![said("user", "x"), said("agent", "y")];
        record_last_included_ts(&session, &events);
        assert_eq!(read_last_included_ts(&session), Some(events[1].timestamp));
    }

    #[test]
    fn invalid_marker_is_ignored() {
        let session = Session::new(Key::new("a", "u", "s"));
        session.set_state(LAST_INCLUDED_TS_KEY, b"not-a-time".to_vec());
        assert!(read_last_included_ts(&session).is_none());
    }

    #[test]
    fn record_with_no_events_is_noop() {
        let session = Session::new(Key::new("a", "u", "s"));
        record_last_included_ts(&session, &[]);
        assert!(session.get_state(LAST_INCLUDED_TS_KEY).is_none());
    }
}
