//! Grindstone error type.
//!
//! Only genuine faults live here. Expected outcomes (an unrecognized
//! screen, an unreachable state, an exhausted budget or retry allowance)
//! are ordinary return values on the APIs that produce them, never errors.

use thiserror::Error;

/// Errors produced by the Grindstone core and its collaborators.
#[derive(Error, Debug)]
pub enum GrindError {
    /// Configuration file missing, unreadable, or malformed.
    #[error("Config error: {0}")]
    Config(String),

    /// Persistence layer failure (open, migrate, read, write).
    #[error("Store error: {0}")]
    Store(String),

    /// Device collaborator failure (capture, tap, app start/stop).
    #[error("Device error: {0}")]
    Device(String),

    /// Recognition collaborator failure (feature extraction, not a miss).
    #[error("Recognition error: {0}")]
    Recognition(String),

    /// Task handler reported a failure.
    #[error("Execution error: {0}")]
    Execution(String),

    /// A bounded wait elapsed before the collaborator answered.
    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GrindError>;
