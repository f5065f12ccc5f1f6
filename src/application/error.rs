//! Application-level errors (wraps domain errors)

use thiserror::Error;

use crate::domain::{ForestError, Strategy};

/// Errors raised by the property store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PropertyError {
    #[error("{argument} must not be empty")]
    NullArgument { argument: &'static str },

    #[error("property name '{name}' for owner type '{owner}' already used")]
    DuplicateName { name: String, owner: &'static str },

    #[error("'{value}' is not a valid {expected} value for property '{name}' (found {found})")]
    TypeMismatch {
        name: String,
        expected: String,
        found: &'static str,
        value: String,
    },

    #[error("'{value}' is not a valid value for property '{name}'")]
    Validation { name: String, value: String },

    #[error("unknown property handle: {0}")]
    UnknownProperty(u32),
}

/// Errors raised by the event router.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("{argument} must not be empty")]
    NullArgument { argument: &'static str },

    #[error("event name '{name}' for owner type '{owner}' already used")]
    DuplicateName { name: String, owner: &'static str },

    #[error("event '{name}' carries {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("event '{name}' uses {found} routing, expected {expected}")]
    StrategyMismatch {
        name: String,
        expected: Strategy,
        found: Strategy,
    },

    #[error("unknown event handle: {0}")]
    UnknownEvent(u32),
}

/// Top-level error of the runtime; every embedder callback returns it too.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("{0}")]
    Forest(#[from] ForestError),

    #[error("{0}")]
    Property(#[from] PropertyError),

    #[error("{0}")]
    Event(#[from] EventError),

    #[error("config error: {message}")]
    Config { message: String },

    #[error("handler failed: {context}")]
    Handler {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl RuntimeError {
    /// Wrap an embedder error raised inside a callback.
    pub fn handler(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Handler {
            context: context.into(),
            source: source.into(),
        }
    }
}

/// Result type for runtime operations and callbacks.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
