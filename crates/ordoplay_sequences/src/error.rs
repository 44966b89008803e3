// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error types shared by sequences and the sequence browser.

use thiserror::Error;

/// Errors raised by sequence and browser operations.
///
/// Most of these are recovered locally by the caller: the steady-state tick
/// path logs them and skips the affected track for the current cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequenceError {
    /// A required argument was empty or otherwise unusable
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Lookup by index value, position or id failed
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation needs a scene/registry but none is attached
    #[error("No registry is attached")]
    RegistryUnavailable,

    /// A record could not be reused because its class differs
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Class the operation expected
        expected: String,
        /// Class that was actually found
        found: String,
    },

    /// The sequence is already synchronized under the given postfix
    #[error("Sequence already tracked as postfix {0}")]
    AlreadyTracked(String),

    /// A persisted document could not be read or written
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for sequence operations
pub type Result<T> = std::result::Result<T, SequenceError>;

impl SequenceError {
    /// Shorthand for a [`SequenceError::NotFound`] with a formatted message
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Shorthand for a [`SequenceError::InvalidArgument`]
    pub fn invalid(what: impl Into<String>) -> Self {
        Self::InvalidArgument(what.into())
    }
}
