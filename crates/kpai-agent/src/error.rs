// error.rs — Error types for unit processors and host event translation.

use std::path::PathBuf;

use kpai_goal::GoalError;
use thiserror::Error;

use crate::host::UnitId;

/// Errors that can occur while translating host events or managing units.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The host referred to a unit the team does not know.
    #[error("unknown unit: {0}")]
    UnknownUnit(UnitId),

    /// The host announced a unit id that is already registered.
    #[error("unit already registered: {0}")]
    DuplicateUnit(UnitId),

    /// The unit exists but has no processor (not finished yet, or dead).
    #[error("no goal processor attached to unit {0}")]
    ProcessorDetached(UnitId),

    /// The AI configuration file could not be read or parsed.
    #[error("invalid AI config at {path}: {message}")]
    Config { path: PathBuf, message: String },

    /// A goal registry operation failed.
    #[error(transparent)]
    Goal(#[from] GoalError),
}
