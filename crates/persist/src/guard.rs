//! Reentrant persistence suppression.
//!
//! A [`PersistenceGuard`] is shared by everything that may write durable
//! state. Code that performs a multi-field mutation holds a
//! [`SuppressionScope`] for the duration; automatic save paths check
//! [`PersistenceGuard::is_suppressed`] and skip while any scope is alive.
//! Skipped writes are not replayed: the scope owner saves explicitly once the
//! scope has ended.

use arena_common::SaveGate;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;

#[derive(Debug, Default)]
pub struct PersistenceGuard {
    depth: Mutex<usize>,
}

impl PersistenceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a suppression scope. Saves resume once every scope acquired so
    /// far has been dropped.
    pub fn acquire(&self) -> SuppressionScope<'_> {
        let mut depth = self.lock();
        *depth += 1;
        trace!(depth = *depth, "persistence suppressed");
        SuppressionScope { guard: self }
    }

    pub fn is_suppressed(&self) -> bool {
        *self.lock() > 0
    }

    /// Number of live scopes.
    pub fn depth(&self) -> usize {
        *self.lock()
    }

    fn release(&self) {
        let mut depth = self.lock();
        *depth = depth.saturating_sub(1);
        trace!(depth = *depth, "persistence scope released");
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.depth.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SaveGate for PersistenceGuard {
    fn is_suppressed(&self) -> bool {
        PersistenceGuard::is_suppressed(self)
    }
}

/// Live suppression. Released on drop, including during unwinding.
#[must_use = "dropping the scope immediately ends suppression"]
#[derive(Debug)]
pub struct SuppressionScope<'a> {
    guard: &'a PersistenceGuard,
}

impl SuppressionScope<'_> {
    /// End the scope now. Equivalent to dropping it.
    pub fn release(self) {}
}

impl Drop for SuppressionScope<'_> {
    fn drop(&mut self) {
        self.guard.release();
    }
}
