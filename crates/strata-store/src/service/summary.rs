//! Summary operations.

use std::sync::Arc;

use strata_core::{Context, Key, Result, SUMMARY_FILTER_KEY_ALL_CONTENTS, Session, SummaryOptions};
use strata_summary::summary_text_from_session;
use tracing::{debug, warn};

use super::SessionService;
use crate::summary_pool::SummaryJob;

impl SessionService {
    /// Summarize `session` for `filter_key` now and persist the result.
    /// A no-op without a summarizer.
    pub async fn create_session_summary(
        &self,
        ctx: &Context,
        session: &Session,
        filter_key: &str,
        force: bool,
    ) -> Result<()> {
        self.ensure_open()?;
        self.store
            .create_session_summary(ctx, session, filter_key, force)
            .await
    }

    /// Queue a summary on the session's shard, or run it inline when
    /// there are no summary workers. Branch jobs are followed by a
    /// full-session summary.
    pub async fn enqueue_summary_job(
        &self,
        ctx: &Context,
        session: &Arc<Session>,
        filter_key: &str,
        force: bool,
    ) -> Result<()> {
        self.ensure_open()?;
        if self.store.summarizer().is_none() {
            return Ok(());
        }
        session.key().check_session_key()?;
        match &self.summaries {
            Some(pool) => {
                pool.enqueue(ctx, SummaryJob::new(Arc::clone(session), filter_key, force))
                    .await
            }
            None => {
                self.store
                    .create_session_summary(ctx, session, filter_key, force)
                    .await
            }
        }
    }

    /// Summary text for `session`: the in-memory summaries first, then the
    /// stored summary for the filter key, then the stored full-session
    /// summary. Storage errors are logged and treated as missing.
    pub async fn get_session_summary_text(
        &self,
        ctx: &Context,
        session: &Session,
        opts: &SummaryOptions,
    ) -> Option<String> {
        if let Some(text) = summary_text_from_session(session, opts) {
            return Some(text);
        }
        if self.is_closed() {
            return None;
        }
        let key = session.key();
        if let Some(text) = self.stored_summary_text(ctx, key, &opts.filter_key) {
            return Some(text);
        }
        if opts.filter_key == SUMMARY_FILTER_KEY_ALL_CONTENTS {
            return None;
        }
        debug!(session = %key, filter_key = %opts.filter_key, "falling back to full-session summary");
        self.stored_summary_text(ctx, key, SUMMARY_FILTER_KEY_ALL_CONTENTS)
    }

    fn stored_summary_text(&self, ctx: &Context, key: &Key, filter_key: &str) -> Option<String> {
        match self.store.load_summary(ctx, key, filter_key) {
            Ok(summary) => summary.map(|s| s.summary).filter(|text| !text.is_empty()),
            Err(e) => {
                warn!(session = %key, filter_key, error = %e, "failed to read stored summary");
                None
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
