//! Per-execution-context routing state.
//!
//! A [`RouteContext`] belongs to one logical execution context (a request,
//! a task) and is threaded through every routing call made on its behalf.
//! It holds two things:
//!
//! - the *selection stack*: which connection scoped operations have
//!   selected, innermost last. Every push is paired with a scope guard
//!   whose drop restores the stack to the depth it had before the push, so
//!   errors, cancellation, panics and dropped futures all unwind it.
//! - the *tracked clock*: the freshest primary position observed after this
//!   context's own writes. It only ever moves forward.
//!
//! Contexts are never shared between concurrent executions; the mutex only
//! exists so that futures holding a `&RouteContext` stay `Send`.

use std::sync::{Mutex, MutexGuard, PoisonError};

use sqlroute_core::Clock;

/// A connection chosen for the duration of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selection {
    /// The master handle.
    Master,
    /// The slave handle at this index in the pool.
    Slave(usize),
}

impl Selection {
    /// Role tag for log output.
    pub const fn role(self) -> &'static str {
        match self {
            Selection::Master => "master",
            Selection::Slave(_) => "slave",
        }
    }
}

#[derive(Debug, Default)]
struct ContextState {
    stack: Vec<Selection>,
    clock: Option<Clock>,
}

/// Selection stack and tracked clock for one execution context.
#[derive(Debug, Default)]
pub struct RouteContext {
    state: Mutex<ContextState>,
}

impl RouteContext {
    /// A fresh context: nothing selected, no tracked clock.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The innermost selection, or `None` when nothing is selected and
    /// unscoped reads go to a randomly drawn slave.
    pub fn current(&self) -> Option<Selection> {
        self.lock().stack.last().copied()
    }

    /// Number of selections on the stack.
    pub fn depth(&self) -> usize {
        self.lock().stack.len()
    }

    /// Snapshot of the stack, outermost first.
    pub fn selections(&self) -> Vec<Selection> {
        self.lock().stack.clone()
    }

    /// The tracked clock, if any write in this context has set it.
    pub fn clock(&self) -> Option<Clock> {
        self.lock().clock.clone()
    }

    /// Forget the tracked clock and every selection.
    ///
    /// Open scopes keep working; their guards simply find less to pop.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.stack.clear();
        state.clock = None;
    }

    /// Push `selection` for the lifetime of the returned guard.
    pub(crate) fn push(&self, selection: Selection) -> ScopeGuard<'_> {
        let mut state = self.lock();
        let depth = state.stack.len();
        state.stack.push(selection);
        ScopeGuard { ctx: self, depth }
    }

    /// Replace the innermost selection with `selection`, or make it the
    /// base selection when the stack is empty.
    pub(crate) fn replace_current(&self, selection: Selection) {
        let mut state = self.lock();
        match state.stack.last_mut() {
            Some(top) => *top = selection,
            None => state.stack.push(selection),
        }
    }

    /// Move the tracked clock forward to `fresh`.
    ///
    /// Returns false, leaving the clock alone, when the tracked clock is
    /// already at or past `fresh`.
    pub(crate) fn advance_clock(&self, fresh: Clock) -> bool {
        let mut state = self.lock();
        if state.clock.as_ref().is_some_and(|current| *current >= fresh) {
            return false;
        }
        state.clock = Some(fresh);
        true
    }
}

/// Pops a pushed selection on drop.
///
/// Truncates to the recorded depth rather than popping once, so the stack
/// comes back exactly as it was even if an inner scope leaked.
#[must_use = "the selection is popped as soon as the guard is dropped"]
pub(crate) struct ScopeGuard<'a> {
    ctx: &'a RouteContext,
    depth: usize,
}

impl ScopeGuard<'_> {
    /// Depth of the stack including this guard's selection.
    pub(crate) fn depth(&self) -> usize {
        self.depth + 1
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.ctx.lock().stack.truncate(self.depth);
    }
}
