//! `should_summarize` trigger checks.
//!
//! A [`Checker`] inspects a session and votes on whether it is worth
//! summarizing. Event and token checks only consider events newer than the
//! [`LAST_INCLUDED_TS_KEY`](crate::LAST_INCLUDED_TS_KEY) marker when one is
//! present and parsable.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use strata_core::{Event, Session};

use crate::summarizer::{conversation_text, read_last_included_ts};

/// A summarization trigger.
pub type Checker = Box<dyn Fn(&Session) -> bool + Send + Sync>;

/// Estimates token counts for summarizer input.
pub trait TokenCounter: Send + Sync {
    /// Estimated tokens in `text`.
    fn count_tokens(&self, text: &str) -> usize;
}

/// Rough estimate: one token per four characters.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimpleTokenCounter;

impl TokenCounter for SimpleTokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        text.chars().count() / 4
    }
}

fn delta_events(session: &Session) -> Vec<Event> {
    let events = session.events();
    match read_last_included_ts(session) {
        Some(since) => events.into_iter().filter(|e| e.timestamp > since).collect(),
        None => events,
    }
}

/// Trigger when more than `threshold` events arrived since the last summary.
pub fn check_event_threshold(threshold: usize) -> Checker {
    Box::new(move |session| delta_events(session).len() > threshold)
}

/// Trigger when the newest event is older than `interval`. Sessions without
/// events never trigger.
pub fn check_time_threshold(interval: Duration) -> Checker {
    let interval = TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX);
    Box::new(move |session| {
        session
            .events()
            .last()
            .is_some_and(|e| Utc::now().signed_duration_since(e.timestamp) > interval)
    })
}

/// Trigger when the new conversation text exceeds `threshold` tokens, as
/// estimated by [`SimpleTokenCounter`].
pub fn check_token_threshold(threshold: usize) -> Checker {
    check_token_threshold_with(threshold, Arc::new(SimpleTokenCounter))
}

/// [`check_token_threshold`] with a custom counter.
pub fn check_token_threshold_with(threshold: usize, counter: Arc<dyn TokenCounter>) -> Checker {
    Box::new(move |session| {
        let text = conversation_text(&delta_events(session));
        if text.is_empty() {
            return false;
        }
        counter.count_tokens(&text) > threshold
    })
}

/// Trigger only when every check triggers. An empty list always triggers.
pub fn checks_all(checks: Vec<Checker>) -> Checker {
    Box::new(move |session| checks.iter().all(|c| c(session)))
}

/// Trigger when any check triggers. An empty list never triggers.
pub fn checks_any(checks: Vec<Checker>) -> Checker {
    Box::new(move |session| checks.iter().any(|c| c(session)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summarizer::LAST_INCLUDED_TS_KEY;
    use chrono::{DateTime, SecondsFormat};
    use strata_core::{Key, Message, Response, SessionSnapshot};

    fn at(ts: DateTime<Utc>) -> Event {
        Event::new("agent").with_timestamp(ts)
    }

    fn said(author: &str, text: &str, ts: DateTime<Utc>) -> Event {
        Event::from_response(author, Response::from_message(Message::user(text))).with_timestamp(ts)
    }

    fn session_with(events: Vec<Event>) -> Session {
        Session::from_snapshot(
            Key::new("a", "u", "s"),
            SessionSnapshot {
                events,
                created_at: Utc::now() - TimeDelta::days(1),
                updated_at: Utc::now(),
                ..SessionSnapshot::default()
            },
        )
    }

    fn mark(session: &Session, ts: DateTime<Utc>) {
        session.set_state(
            LAST_INCLUDED_TS_KEY,
            ts.to_rfc3339_opts(SecondsFormat::Nanos, true).into_bytes(),
        );
    }

    fn always(v: bool) -> Checker {
        Box::new(move |_| v)
    }

    #[test]
    fn event_threshold_is_strict() {
        let now = Utc::now();
        let ten = session_with((0..10).map(|_| at(now)).collect());
        let five = session_with((0..5).map(|_| at(now)).collect());
        assert!(check_event_threshold(5)(&ten));
        assert!(!check_event_threshold(5)(&five));
        assert!(!check_event_threshold(10)(&five));
    }

    #[test]
    fn event_threshold_counts_only_delta() {
        let now = Utc::now();
        let s = session_with(vec![
            at(now - TimeDelta::hours(3)),
            at(now - TimeDelta::hours(2)),
            at(now - TimeDelta::hours(1)),
            at(now),
        ]);
        mark(&s, now - TimeDelta::hours(2));
        assert!(!check_event_threshold(2)(&s));
        assert!(check_event_threshold(1)(&s));
    }

    #[test]
    fn future_marker_yields_no_delta() {
        let now = Utc::now();
        let s = session_with(vec![at(now - TimeDelta::minutes(2)), at(now - TimeDelta::minutes(1))]);
        mark(&s, now + TimeDelta::minutes(5));
        assert!(!check_event_threshold(0)(&s));
    }

    #[test]
    fn invalid_marker_counts_all_events() {
        let now = Utc::now();
        let s = session_with((0..5).map(|_| at(now)).collect());
        s.set_state(LAST_INCLUDED_TS_KEY, b"invalid-timestamp".to_vec());
        assert!(check_event_threshold(2)(&s));
    }

    #[test]
    fn time_threshold() {
        let now = Utc::now();
        let stale = session_with(vec![at(now - TimeDelta::hours(2))]);
        let fresh = session_with(vec![at(now - TimeDelta::minutes(30))]);
        assert!(check_time_threshold(Duration::from_secs(3600))(&stale));
        assert!(!check_time_threshold(Duration::from_secs(3600))(&fresh));
        assert!(!check_time_threshold(Duration::from_secs(3600))(&session_with(vec![])));
    }

    #[test]
    fn token_threshold_uses_conversation_text() {
        let now = Utc::now();
        let long = session_with(vec![said("user", &"a".repeat(800), now)]);
        let short = session_with(vec![said("user", &"a".repeat(40), now)]);
        assert!(check_token_threshold(100)(&long));
        assert!(!check_token_threshold(100)(&short));
    }

    #[test]
    fn token_threshold_equal_does_not_trigger() {
        let now = Utc::now();
        let events = vec![said("user", &"a".repeat(200), now)];
        let tokens = SimpleTokenCounter.count_tokens(&conversation_text(&events));
        assert!(!check_token_threshold(tokens)(&session_with(events)));
    }

    #[test]
    fn token_threshold_counts_only_delta() {
        let now = Utc::now();
        let s = session_with(vec![
            said("user", &"a".repeat(800), now - TimeDelta::hours(2)),
            said("assistant", "short", now),
        ]);
        mark(&s, now - TimeDelta::hours(2));
        assert!(!check_token_threshold(50)(&s));
    }

    #[test]
    fn token_threshold_without_text_is_false() {
        let now = Utc::now();
        assert!(!check_token_threshold(10)(&session_with(vec![])));
        assert!(!check_token_threshold(10)(&session_with(vec![at(now)])));
    }

    #[test]
    fn custom_token_counter() {
        struct Fixed(usize);
        impl TokenCounter for Fixed {
            fn count_tokens(&self, _text: &str) -> usize {
                self.0
            }
        }
        let s = session_with(vec![said("user", "a", Utc::now())]);
        assert!(check_token_threshold_with(100, Arc::new(Fixed(1000)))(&s));
    }

    #[test]
    fn combinators() {
        let s = session_with(vec![]);
        assert!(checks_all(vec![])(&s));
        assert!(!checks_any(vec![])(&s));
        assert!(checks_all(vec![always(true), always(true)])(&s));
        assert!(!checks_all(vec![always(true), always(false)])(&s));
        assert!(checks_any(vec![always(false), always(true)])(&s));
        assert!(!checks_any(vec![always(false), always(false)])(&s));
    }
}
