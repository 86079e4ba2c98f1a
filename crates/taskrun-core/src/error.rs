//! Core domain errors.

use thiserror::Error;

/// Core domain errors for TaskRun.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Object key is not of the form `namespace/name` or `name`.
    #[error("Invalid resource key: {0:?}")]
    InvalidKey(String),

    /// Duration string could not be parsed.
    #[error("Invalid duration {input:?}: {reason}")]
    InvalidDuration { input: String, reason: String },
}
