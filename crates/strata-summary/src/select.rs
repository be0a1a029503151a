//! Summary text selection and branch-to-full copying.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use strata_core::{SUMMARY_FILTER_KEY_ALL_CONTENTS, Session, Summary, SummaryOptions};

fn usable(summary: &Summary, min_time: Option<DateTime<Utc>>) -> bool {
    !summary.summary.is_empty() && min_time.is_none_or(|t| summary.updated_at >= t)
}

/// Pick summary text for `filter_key`.
///
/// Preference: the requested key, then the full-session key, then any other
/// non-empty entry (lowest key first). Summaries older than `min_time` are
/// ignored.
pub fn pick_summary_text(
    summaries: &HashMap<String, Summary>,
    filter_key: &str,
    min_time: Option<DateTime<Utc>>,
) -> Option<String> {
    if let Some(s) = summaries.get(filter_key).filter(|s| usable(s, min_time)) {
        return Some(s.summary.clone());
    }
    if filter_key != SUMMARY_FILTER_KEY_ALL_CONTENTS {
        if let Some(s) = summaries
            .get(SUMMARY_FILTER_KEY_ALL_CONTENTS)
            .filter(|s| usable(s, min_time))
        {
            return Some(s.summary.clone());
        }
    }
    let mut rest: Vec<(&String, &Summary)> = summaries
        .iter()
        .filter(|(_, s)| usable(s, min_time))
        .collect();
    rest.sort_by(|a, b| a.0.cmp(b.0));
    rest.first().map(|(_, s)| s.summary.clone())
}

/// Summary text held in memory by `session`, ignoring summaries from before
/// the session was created.
pub fn summary_text_from_session(session: &Session, opts: &SummaryOptions) -> Option<String> {
    let summaries = session.summaries();
    if summaries.is_empty() {
        return None;
    }
    pick_summary_text(&summaries, &opts.filter_key, Some(session.created_at()))
}

/// Whether every event in `session` belongs to `filter_key`, making the
/// branch summary identical to the full-session one.
pub fn is_single_filter_key(session: &Session, filter_key: &str) -> bool {
    if filter_key.is_empty() {
        return false;
    }
    session.events().iter().all(|e| e.filter(filter_key))
}

/// Copy the summary at `src_key` to `dst_key`, marking the copy as pending
/// persistence. Missing sources are ignored.
pub fn copy_summary_to_key(session: &Session, src_key: &str, dst_key: &str) {
    session.update_summaries(|summaries| {
        let Some(src) = summaries.get(src_key) else {
            return;
        };
        let copy = Summary {
            summary: src.summary.clone(),
            topics: src.topics.clone(),
            updated_at: src.updated_at,
            pending_persist: true,
        };
        let _ = summaries.insert(dst_key.to_string(), copy);
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use strata_core::{Event, Key, Message, Response, SessionSnapshot};

    fn summary(text: &str, at: DateTime<Utc>) -> Summary {
        Summary {
            summary: text.into(),
            topics: vec![],
            updated_at: at,
            pending_persist: false,
        }
    }

    fn map(entries: &[(&str, Summary)]) -> HashMap<String, Summary> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn prefers_requested_key() {
        let now = Utc::now();
        let m = map(&[("", summary("full", now)), ("planner", summary("branch", now))]);
        assert_eq!(pick_summary_text(&m, "planner", None).as_deref(), Some("branch"));
        assert_eq!(pick_summary_text(&m, "", None).as_deref(), Some("full"));
    }

    #[test]
    fn falls_back_to_full_then_any() {
        let now = Utc::now();
        let m = map(&[("", summary("full", now)), ("writer", summary("w", now))]);
        assert_eq!(pick_summary_text(&m, "planner", None).as_deref(), Some("full"));

        let only_branches = map(&[("b", summary("bee", now)), ("a", summary("", now))]);
        assert_eq!(pick_summary_text(&only_branches, "", None).as_deref(), Some("bee"));
        assert!(pick_summary_text(&HashMap::new(), "", None).is_none());
    }

    #[test]
    fn ignores_stale_summaries() {
        let now = Utc::now();
        let m = map(&[("", summary("old", now - TimeDelta::hours(2)))]);
        assert!(pick_summary_text(&m, "", Some(now - TimeDelta::hours(1))).is_none());
        assert!(pick_summary_text(&m, "", Some(now - TimeDelta::hours(3))).is_some());
    }

    fn session_with(events: Vec<Event>) -> Session {
        let now = Utc::now();
        Session::from_snapshot(
            Key::new("a", "u", "s"),
            SessionSnapshot {
                events,
                created_at: now - TimeDelta::minutes(10),
                updated_at: now,
                ..SessionSnapshot::default()
            },
        )
    }

    fn keyed(filter_key: &str) -> Event {
        Event::from_response("user", Response::from_message(Message::user("x")))
            .with_filter_key(filter_key)
    }

    #[test]
    fn session_text_respects_created_at() {
        let s = session_with(vec![]);
        assert!(summary_text_from_session(&s, &SummaryOptions::default()).is_none());
        s.set_summary("", summary("before", s.created_at() - TimeDelta::minutes(1)));
        assert!(summary_text_from_session(&s, &SummaryOptions::default()).is_none());
        s.set_summary("", summary("after", Utc::now()));
        assert_eq!(
            summary_text_from_session(&s, &SummaryOptions::with_filter_key("x")).as_deref(),
            Some("after")
        );
    }

    #[test]
    fn single_filter_key_detection() {
        let s = session_with(vec![keyed("planner"), keyed("planner/search")]);
        assert!(is_single_filter_key(&s, "planner"));
        assert!(!is_single_filter_key(&s, ""));

        let mixed = session_with(vec![keyed("planner"), keyed("writer")]);
        assert!(!is_single_filter_key(&mixed, "planner"));
    }

    #[test]
    fn copy_marks_pending() {
        let s = session_with(vec![]);
        copy_summary_to_key(&s, "planner", "");
        assert!(s.summary("").is_none());

        s.set_summary("planner", summary("branch", Utc::now()));
        copy_summary_to_key(&s, "planner", "");
        let copied = s.summary("").unwrap();
        assert_eq!(copied.summary, "branch");
        assert!(copied.pending_persist);
        assert!(!s.summary("planner").unwrap().pending_persist);
    }
}
