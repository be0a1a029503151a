//! Per-filter-key delta summarization.
//!
//! Each filter key keeps its own summary. A new run only feeds the
//! summarizer events strictly newer than that summary's `updated_at`, with
//! the previous summary text prepended so the model can extend it.

use chrono::{DateTime, Utc};
use strata_core::{
    Context, ErrorKind, Event, Key, Message, Response, Result, Session, SessionError,
    SessionSnapshot, Summary,
};
use tracing::debug;

use crate::summarizer::{Summarizer, read_last_included_ts};

const AUTHOR_SYSTEM: &str = "system";

/// Events strictly after `since` that match `filter_key`, plus the newest
/// timestamp among them. `None` for `since` considers every event.
pub fn compute_delta_since(
    session: &Session,
    since: Option<DateTime<Utc>>,
    filter_key: &str,
) -> (Vec<Event>, Option<DateTime<Utc>>) {
    let delta: Vec<Event> = session
        .events()
        .into_iter()
        .filter(|e| since.is_none_or(|t| e.timestamp > t))
        .filter(|e| e.filter(filter_key))
        .collect();
    let latest = delta.iter().map(|e| e.timestamp).max();
    (delta, latest)
}

/// Prepend `prev_summary` as a synthetic `system` event. Empty text leaves
/// `delta` untouched.
pub fn prepend_prev_summary(prev_summary: &str, delta: Vec<Event>, now: DateTime<Utc>) -> Vec<Event> {
    if prev_summary.is_empty() {
        return delta;
    }
    let mut out = Vec::with_capacity(delta.len() + 1);
    out.push(
        Event::from_response(
            AUTHOR_SYSTEM,
            Response::from_message(Message::system(prev_summary)),
        )
        .with_timestamp(now),
    );
    out.extend(delta);
    out
}

/// Temporary session holding `events`, identified as `"<id>:<filter_key>"`.
/// It carries no state so summarizer markers never leak into the base.
pub fn build_filter_session(base: &Session, filter_key: &str, events: Vec<Event>) -> Session {
    let key = Key::new(
        base.app_name(),
        base.user_id(),
        format!("{}:{filter_key}", base.id()),
    );
    Session::from_snapshot(
        key,
        SessionSnapshot {
            events,
            created_at: base.created_at(),
            updated_at: Utc::now(),
            ..SessionSnapshot::default()
        },
    )
}

/// Summarize `base` for `filter_key` and store the result in its summary map.
///
/// Returns `true` when the in-memory summary changed and should be
/// persisted. Without `force`, an empty delta or a negative
/// `should_summarize` vote skips the run. A summary copied from another key
/// (`pending_persist`) is finalized without calling the summarizer.
pub async fn summarize_session(
    ctx: &Context,
    summarizer: &dyn Summarizer,
    base: &Session,
    filter_key: &str,
    force: bool,
) -> Result<bool> {
    let prev = base.summary(filter_key);

    if prev
        .as_ref()
        .is_some_and(|p| p.pending_persist && !p.summary.is_empty())
    {
        let (_, latest) = compute_delta_since(base, None, filter_key);
        let updated_at = latest.unwrap_or_else(Utc::now);
        base.update_summaries(|summaries| {
            if let Some(s) = summaries.get_mut(filter_key) {
                s.updated_at = updated_at;
                s.pending_persist = false;
            }
        });
        debug!(session = %base.key(), filter_key, "finalizing copied summary");
        return Ok(true);
    }

    let prev_at = prev.as_ref().map(|p| p.updated_at);
    let prev_text = prev.map(|p| p.summary).unwrap_or_default();

    let (delta, latest) = compute_delta_since(base, prev_at, filter_key);
    if !force && delta.is_empty() {
        debug!(session = %base.key(), filter_key, "no new events, skipping summary");
        return Ok(false);
    }
    let has_delta = !delta.is_empty();

    let input = prepend_prev_summary(&prev_text, delta, Utc::now());
    let tmp = build_filter_session(base, filter_key, input);
    if !force && !summarizer.should_summarize(&tmp) {
        debug!(session = %base.key(), filter_key, "summarizer declined");
        return Ok(false);
    }

    let text = match summarizer.summarize(ctx, &tmp).await {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::ContextCancelled => return Err(e),
        Err(e) => {
            return Err(SessionError::Summarizer(format!(
                "summarize session {} failed: {e}",
                base.id()
            )));
        }
    };
    if text.is_empty() {
        return Ok(false);
    }

    let updated_at = select_updated_at(&tmp, prev_at, latest, has_delta);
    base.set_summary(
        filter_key,
        Summary {
            summary: text,
            topics: Vec::new(),
            updated_at,
            pending_persist: false,
        },
    );
    Ok(true)
}

/// The summary covers events up to the summarizer's marker if it set one,
/// else the newest delta event. Without new events the previous timestamp
/// is kept.
fn select_updated_at(
    tmp: &Session,
    prev_at: Option<DateTime<Utc>>,
    latest: Option<DateTime<Utc>>,
    has_delta: bool,
) -> DateTime<Utc> {
    let fallback = prev_at.unwrap_or_else(Utc::now);
    match latest {
        Some(latest) if has_delta => read_last_included_ts(tmp).unwrap_or(latest),
        _ => fallback,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summarizer::record_last_included_ts;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::TimeDelta;
    use std::sync::Mutex;
    use strata_core::ContextError;

    /// Echoes the number of input events; records what it was given.
    #[derive(Default)]
    struct CountingSummarizer {
        allow: bool,
        mark_first_only: bool,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl CountingSummarizer {
        fn allowing() -> Self {
            Self {
                allow: true,
                ..Self::default()
            }
        }
        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Summarizer for CountingSummarizer {
        fn should_summarize(&self, _session: &Session) -> bool {
            self.allow
        }
        async fn summarize(&self, _ctx: &Context, session: &Session) -> Result<String> {
            let events = session.events();
            self.calls.lock().unwrap().push(
                events
                    .iter()
                    .map(|e| e.response.as_ref().unwrap().choices[0].message.content.clone())
                    .collect(),
            );
            if self.mark_first_only {
                record_last_included_ts(session, &events[..1]);
            }
            Ok(format!("{} events", events.len()))
        }
    }

    struct Failing(SessionError);

    #[async_trait]
    impl Summarizer for Failing {
        fn should_summarize(&self, _session: &Session) -> bool {
            true
        }
        async fn summarize(&self, _ctx: &Context, _session: &Session) -> Result<String> {
            Err(match &self.0 {
                SessionError::Context(c) => SessionError::Context(*c),
                other => SessionError::Summarizer(other.to_string()),
            })
        }
    }

    fn said(text: &str, filter_key: &str, ts: DateTime<Utc>) -> Event {
        Event::from_response("user", Response::from_message(Message::user(text)))
            .with_filter_key(filter_key)
            .with_timestamp(ts)
    }

    fn base(events: Vec<Event>) -> Session {
        let now = Utc::now();
        Session::from_snapshot(
            Key::new("app", "user", "s1"),
            SessionSnapshot {
                events,
                created_at: now - TimeDelta::days(1),
                updated_at: now,
                ..SessionSnapshot::default()
            },
        )
    }

    #[test]
    fn delta_respects_time_and_filter() {
        let t0 = Utc::now() - TimeDelta::minutes(10);
        let s = base(vec![
            said("a", "planner", t0),
            said("b", "writer", t0 + TimeDelta::minutes(1)),
            said("c", "planner/search", t0 + TimeDelta::minutes(2)),
        ]);
        let (all, latest) = compute_delta_since(&s, None, "");
        assert_eq!(all.len(), 3);
        assert_eq!(latest, Some(t0 + TimeDelta::minutes(2)));

        let (planner, _) = compute_delta_since(&s, Some(t0), "planner");
        assert_eq!(planner.len(), 1);
        assert_eq!(planner[0].filter_key, "planner/search");
    }

    #[test]
    fn prepend_only_when_text_present() {
        let now = Utc::now();
        assert_eq!(prepend_prev_summary("", vec![said("x", "", now)], now).len(), 1);
        let out = prepend_prev_summary("before", vec![said("x", "", now)], now);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].author, "system");
    }

    #[test]
    fn filter_session_id() {
        let s = base(vec![]);
        let tmp = build_filter_session(&s, "planner", vec![]);
        assert_eq!(tmp.id(), "s1:planner");
        assert_eq!(tmp.created_at(), s.created_at());
        assert!(tmp.state().is_empty());
    }

    #[tokio::test]
    async fn summarizes_then_only_delta() {
        let t0 = Utc::now() - TimeDelta::minutes(10);
        let s = base(vec![said("q1", "", t0), said("a1", "", t0 + TimeDelta::minutes(1))]);
        let m = CountingSummarizer::allowing();
        let ctx = Context::background();

        assert!(summarize_session(&ctx, &m, &s, "", false).await.unwrap());
        let first = s.summary("").unwrap();
        assert_eq!(first.summary, "2 events");
        assert_eq!(first.updated_at, t0 + TimeDelta::minutes(1));

        // nothing new
        assert!(!summarize_session(&ctx, &m, &s, "", false).await.unwrap());

        s.update_user_session(
            &said("q2", "", t0 + TimeDelta::minutes(2)),
            &strata_core::Options::default(),
        );
        assert!(summarize_session(&ctx, &m, &s, "", false).await.unwrap());
        // previous summary prepended to the single new event
        assert_eq!(m.calls()[1], vec!["2 events".to_string(), "q2".to_string()]);
    }

    #[tokio::test]
    async fn declined_unless_forced() {
        let s = base(vec![said("q", "", Utc::now())]);
        let m = CountingSummarizer::default();
        let ctx = Context::background();
        assert!(!summarize_session(&ctx, &m, &s, "", false).await.unwrap());
        assert!(s.summary("").is_none());
        assert!(summarize_session(&ctx, &m, &s, "", true).await.unwrap());
    }

    #[tokio::test]
    async fn force_with_empty_delta_keeps_previous_timestamp() {
        let t0 = Utc::now() - TimeDelta::minutes(5);
        let s = base(vec![said("q", "", t0)]);
        let m = CountingSummarizer::allowing();
        let ctx = Context::background();
        assert!(summarize_session(&ctx, &m, &s, "", false).await.unwrap());
        assert!(summarize_session(&ctx, &m, &s, "", true).await.unwrap());
        assert_eq!(s.summary("").unwrap().updated_at, t0);
    }

    #[tokio::test]
    async fn marker_overrides_latest_timestamp() {
        let t0 = Utc::now() - TimeDelta::minutes(5);
        let s = base(vec![said("q", "", t0), said("a", "", t0 + TimeDelta::minutes(1))]);
        let m = CountingSummarizer {
            allow: true,
            mark_first_only: true,
            ..CountingSummarizer::default()
        };
        assert!(summarize_session(&Context::background(), &m, &s, "", false).await.unwrap());
        assert_eq!(s.summary("").unwrap().updated_at, t0);
        // marker stayed on the temporary session
        assert!(s.get_state(crate::LAST_INCLUDED_TS_KEY).is_none());
    }

    #[tokio::test]
    async fn pending_copy_persists_without_summarizer() {
        let t0 = Utc::now() - TimeDelta::minutes(5);
        let s = base(vec![said("q", "planner", t0)]);
        s.set_summary(
            "",
            Summary {
                summary: "copied".into(),
                topics: vec![],
                updated_at: Utc::now(),
                pending_persist: true,
            },
        );
        let m = CountingSummarizer::allowing();
        assert!(summarize_session(&Context::background(), &m, &s, "", false).await.unwrap());
        assert!(m.calls().is_empty());
        let sum = s.summary("").unwrap();
        assert!(!sum.pending_persist);
        assert_eq!(sum.updated_at, t0);
    }

    #[tokio::test]
    async fn summarizer_errors_are_wrapped() {
        let s = base(vec![said("q", "", Utc::now())]);
        let m = Failing(SessionError::Summarizer("model down".into()));
        let err = summarize_session(&Context::background(), &m, &s, "", false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Summarizer);
        assert!(err.to_string().contains("summarize session s1 failed"));
    }

    #[tokio::test]
    async fn cancellation_passes_through() {
        let s = base(vec![said("q", "", Utc::now())]);
        let m = Failing(SessionError::Context(ContextError::DeadlineExceeded));
        assert_matches!(
            summarize_session(&Context::background(), &m, &s, "", false).await,
            Err(SessionError::Context(ContextError::DeadlineExceeded))
        );
    }
}
