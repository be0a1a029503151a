//! Hook contexts for the two wrapped service operations.

use std::sync::Arc;

use strata_core::{Context, Event, Key, Options, Session};

use crate::chain::{Hook, HookChain};

/// Input to the `GetSession` chain.
#[derive(Clone, Debug)]
pub struct GetSessionContext {
    /// Cancellation context of the call.
    pub ctx: Context,
    /// Session being read.
    pub key: Key,
    /// Event window options.
    pub options: Options,
}

/// Input to the `AppendEvent` chain.
#[derive(Clone, Debug)]
pub struct AppendEventContext {
    /// Cancellation context of the call.
    pub ctx: Context,
    /// In-memory session receiving the event.
    pub session: Arc<Session>,
    /// Event being appended.
    pub event: Event,
    /// Key of `session`.
    pub key: Key,
}

/// Hook around session reads. `None` means the session does not exist.
pub type GetSessionHook = dyn Hook<GetSessionContext, Option<Arc<Session>>>;

/// Hook around event appends.
pub type AppendEventHook = dyn Hook<AppendEventContext, ()>;

/// Chain of [`GetSessionHook`]s.
pub type GetSessionChain = HookChain<GetSessionContext, Option<Arc<Session>>>;

/// Chain of [`AppendEventHook`]s.
pub type AppendEventChain = HookChain<AppendEventContext, ()>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
