//! # strata-summary
//!
//! Session summarization for the Strata session store.
//!
//! - [`Summarizer`]: the pluggable contract an LLM-backed summarizer implements
//! - [`checker`]: `should_summarize` trigger combinators (event count, idle time, tokens)
//! - [`delta`]: per-filter-key delta summarization over a [`Session`](strata_core::Session)
//! - [`select`]: summary text selection and the single-filter-key cascade helpers

#![deny(unsafe_code)]

pub mod checker;
pub mod delta;
pub mod select;
pub mod summarizer;

pub use checker::{
    Checker, SimpleTokenCounter, TokenCounter, check_event_threshold, check_time_threshold,
    check_token_threshold, check_token_threshold_with, checks_all, checks_any,
};
pub use delta::{build_filter_session, compute_delta_since, prepend_prev_summary, summarize_session};
pub use select::{copy_summary_to_key, is_single_filter_key, pick_summary_text, summary_text_from_session};
pub use summarizer::{
    LAST_INCLUDED_TS_KEY, Summarizer, conversation_text, read_last_included_ts,
    record_last_included_ts,
};
