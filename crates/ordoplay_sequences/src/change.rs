// SPDX-License-Identifier: MIT OR Apache-2.0
//! Batched modification tracking.
//!
//! Objects that are observed (records in a registry, browser nodes) wrap
//! multi-field updates in a `begin`/`end` bracket. Intermediate states are
//! never announced: exactly one notification is due when the outermost bracket
//! closes, and only if a field actually changed inside it. Nested brackets on
//! the same object coalesce into the outermost one.

/// Tracks nesting depth and pending changes of one observed object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeTracker {
    depth: u32,
    pending: bool,
}

impl ChangeTracker {
    /// Create a tracker outside of any bracket
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a bracket. Returns `true` if a bracket was already open.
    pub fn begin(&mut self) -> bool {
        self.depth += 1;
        self.depth > 1
    }

    /// Record that a field changed.
    ///
    /// Returns `true` when the change is not covered by an open bracket and
    /// must be announced immediately.
    pub fn mark(&mut self) -> bool {
        if self.depth > 0 {
            self.pending = true;
            false
        } else {
            true
        }
    }

    /// Close a bracket. Returns `true` when the outermost bracket closed with
    /// pending changes, i.e. when one notification is due now.
    pub fn end(&mut self) -> bool {
        if self.depth == 0 {
            tracing::warn!("ChangeTracker::end called without a matching begin");
            return false;
        }
        self.depth -= 1;
        self.depth == 0 && std::mem::take(&mut self.pending)
    }

    /// Whether a bracket is currently open
    pub fn is_batching(&self) -> bool {
        self.depth > 0
    }

    /// Whether changes are waiting for the outermost bracket to close
    pub fn has_pending(&self) -> bool {
        self.pending
    }
}
