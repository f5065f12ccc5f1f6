//! Domain-level errors (no callbacks involved)

use thiserror::Error;

/// Errors raised by forest topology changes.
///
/// Node keys are stored in their `Debug` rendering so the error type stays
/// independent of the embedder's key type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ForestError {
    #[error("node {child} already has a parent")]
    AlreadyAttached { child: String },

    #[error("attaching {child} under {parent} would create a cycle")]
    WouldCreateCycle { child: String, parent: String },
}

/// Result type for forest operations.
pub type ForestResult<T> = Result<T, ForestError>;
