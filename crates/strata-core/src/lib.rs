//! # strata-core
//!
//! Foundation types for the Strata conversational session store.
//!
//! This crate provides the shared vocabulary that all other Strata crates depend on:
//!
//! - **Session aggregate**: [`Session`] with independently guarded state, events, tracks, and summaries
//! - **Events**: [`Event`] wrapping a model [`Response`] plus a state delta and filter key
//! - **Keys**: [`Key`] / [`UserKey`] with validation
//! - **State scopes**: `app:` / `user:` / `temp:` prefix handling and the base64 JSON envelope
//! - **Sharding**: 32-bit murmur3 hash used to route a session to a worker shard
//! - **Cancellation**: [`Context`] carrying a cancellation token and an optional deadline
//! - **Errors**: [`SessionError`] taxonomy with tagged [`ErrorKind`] categories
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod context;
pub mod errors;
pub mod event;
pub mod hash;
pub mod key;
pub mod logging;
pub mod response;
pub mod session;
pub mod state;
pub mod time;

pub use context::{Context, ContextError};
pub use errors::{ErrorKind, Result, SessionError};
pub use event::Event;
pub use hash::{murmur3_32, session_hash, shard_index};
pub use key::{Key, KeyError, UserKey};
pub use response::{Choice, FunctionCall, Message, Response, ResponseError, Role, ToolCall};
pub use session::{
    Options, SUMMARY_FILTER_KEY_ALL_CONTENTS, Session, SessionSnapshot, Summary, SummaryOptions,
    Track, TrackEvent, TrackEvents,
};
pub use state::StateMap;
