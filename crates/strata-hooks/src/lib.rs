//! # strata-hooks
//!
//! Chain-of-responsibility middleware wrapped around session reads and
//! appends.
//!
//! A [`HookChain`] holds hooks sorted by priority (highest first). Running
//! the chain hands the first hook a context value and a [`Next`]
//! continuation; the hook may inspect or replace the context, call
//! [`Next::run`], post-process the result, or return early without calling
//! it. The innermost step is the service's own implementation.
//!
//! Two concrete chains are used by the store:
//! - [`GetSessionHook`] over [`GetSessionContext`], producing the loaded session
//! - [`AppendEventHook`] over [`AppendEventContext`], producing `()`
//!
//! Errors propagate unchanged through the chain.

#![deny(unsafe_code)]

pub mod chain;
pub mod context;

pub use chain::{BoxFuture, Hook, HookChain, Next, Terminal};
pub use context::{
    AppendEventChain, AppendEventContext, AppendEventHook, GetSessionChain, GetSessionContext,
    GetSessionHook,
};
