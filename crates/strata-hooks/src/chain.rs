//! Generic hook chain.
//!
//! Hooks are ordered by priority (descending) when registered. Registering a
//! hook whose name is already present replaces the earlier one.

use std::cmp::Reverse;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use strata_core::Result;
use tracing::debug;

pub use futures::future::BoxFuture;

/// The innermost step of a chain: the operation being wrapped.
pub type Terminal<'a, C, R> = dyn Fn(C) -> BoxFuture<'a, Result<R>> + Send + Sync + 'a;

/// A middleware step around an operation taking `C` and producing `R`.
///
/// # Priority
///
/// Higher priority hooks run first (outermost). Default priority is 0.
#[async_trait]
pub trait Hook<C, R>: Send + Sync {
    /// Unique name for this hook.
    fn name(&self) -> &str;

    /// Execution priority. Higher runs first. Default: 0.
    fn priority(&self) -> i32 {
        0
    }

    /// Handle the call. Invoke `next.run(ctx)` to continue down the chain,
    /// or return without calling it to short-circuit.
    async fn handle(&self, ctx: C, next: Next<'_, C, R>) -> Result<R>;
}

/// Continuation handed to each hook: the remaining hooks plus the terminal.
pub struct Next<'a, C, R> {
    hooks: &'a [Arc<dyn Hook<C, R>>],
    terminal: &'a Terminal<'a, C, R>,
}

impl<'a, C, R> Next<'a, C, R>
where
    C: Send + 'static,
    R: Send + 'static,
{
    /// Run the rest of the chain.
    pub async fn run(self, ctx: C) -> Result<R> {
        match self.hooks.split_first() {
            Some((hook, rest)) => {
                let next = Next {
                    hooks: rest,
                    terminal: self.terminal,
                };
                hook.handle(ctx, next).await
            }
            None => (self.terminal)(ctx).await,
        }
    }

    /// Number of hooks still to run before the terminal.
    pub fn remaining(&self) -> usize {
        self.hooks.len()
    }
}

/// Priority-sorted hooks for one operation.
pub struct HookChain<C, R> {
    hooks: Vec<Arc<dyn Hook<C, R>>>,
}

impl<C, R> HookChain<C, R>
where
    C: Send + 'static,
    R: Send + 'static,
{
    /// An empty chain; running it calls the terminal directly.
    #[must_use]
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Register a hook, replacing any hook with the same name.
    pub fn register(&mut self, hook: Arc<dyn Hook<C, R>>) {
        let name = hook.name().to_string();
        self.hooks.retain(|h| h.name() != name);
        debug!(name = %name, priority = hook.priority(), "registering hook");
        self.hooks.push(hook);
        self.hooks.sort_by_key(|h| Reverse(h.priority()));
    }

    /// Remove a hook by name. Returns `true` if one was removed.
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.hooks.len();
        self.hooks.retain(|h| h.name() != name);
        self.hooks.len() < before
    }

    /// Hook names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    /// Number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Whether no hooks are registered.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run `ctx` through every hook and finally `terminal`.
    pub async fn run<'a>(&'a self, ctx: C, terminal: &'a Terminal<'a, C, R>) -> Result<R> {
        Next {
            hooks: &self.hooks,
            terminal,
        }
        .run(ctx)
        .await
    }
}

impl<C, R> Default for HookChain<C, R>
where
    C: Send + 'static,
    R: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<C, R> Clone for HookChain<C, R> {
    fn clone(&self) -> Self {
        Self {
            hooks: self.hooks.clone(),
        }
    }
}

impl<C, R> fmt::Debug for HookChain<C, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookChain")
            .field("hook_count", &self.hooks.len())
            .finish()
    }
}

impl<C, R> FromIterator<Arc<dyn Hook<C, R>>> for HookChain<C, R>
where
    C: Send + 'static,
    R: Send + 'static,
{
    fn from_iter<I: IntoIterator<Item = Arc<dyn Hook<C, R>>>>(iter: I) -> Self {
        let mut chain = Self::new();
        for hook in iter {
            chain.register(hook);
        }
        chain
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
