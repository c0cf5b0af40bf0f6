// error.rs — Error types for the goal subsystem.
//
// Not-found is an expected outcome (goals are removed by cascades all the
// time), so it is a plain variant that callers branch on. InvalidTransition
// is the release-build face of a programming error; debug builds assert
// before it is ever returned.

use thiserror::Error;

use crate::goal::GoalId;

/// Errors that can occur during goal lifecycle operations.
#[derive(Debug, Error)]
pub enum GoalError {
    /// The goal id is not (or no longer) in the registry.
    #[error("goal not found: {0}")]
    NotFound(GoalId),

    /// Invalid phase transition (e.g. completing a finished goal).
    #[error("invalid transition from {from} to {to} for goal {goal_id}")]
    InvalidTransition {
        goal_id: GoalId,
        from: String,
        to: String,
    },

    /// A goal parameter had a different tag than the caller asked for.
    #[error("goal parameter {index} is {found}, expected {expected}")]
    ParamType {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },

    /// The goal has fewer parameters than the caller asked for.
    #[error("goal has no parameter at index {index}")]
    MissingParam { index: usize },

    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: String,
        source: std::io::Error,
    },

    /// Failed to serialize an event.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A notification dispatch failed (non-fatal).
    #[error("notification error: {0}")]
    NotificationError(String),
}
