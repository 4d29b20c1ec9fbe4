//! Failure taxonomy for a single execution request

use thiserror::Error;

use super::output::truncate_chars;

/// Upper bound on generic failure descriptions returned to callers
pub const MAX_ERROR_CHARS: usize = 500;

/// Failures that end a request early.
///
/// Every variant resolves into the `{error}` response shape; nothing here
/// crosses the HTTP boundary as a non-JSON failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecuteError {
    /// Rejected before any sandbox was created
    #[error("{0}")]
    Validation(String),
    /// Sandbox creation or file materialization failed
    #[error("{0}")]
    Provisioning(String),
    /// A command or the sandbox lifetime ran out of time
    #[error("Execution timed out")]
    Timeout,
    /// Any other command failure, description already truncated
    #[error("{0}")]
    Internal(String),
}

impl ExecuteError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn provisioning(message: impl Into<String>) -> Self {
        Self::Provisioning(message.into())
    }
}

/// Whether a failure description reports a timeout
pub fn is_timeout_description(description: &str) -> bool {
    let lowered = description.to_lowercase();
    lowered.contains("timeout") || lowered.contains("timed out")
}

/// Classify a failed sandbox command.
///
/// Timeout-flavored failures collapse into [`ExecuteError::Timeout`]; everything
/// else keeps its description, cut to [`MAX_ERROR_CHARS`].
pub fn classify_command_failure(err: &anyhow::Error) -> ExecuteError {
    let description = format!("{:#}", err);
    if is_timeout_description(&description) {
        ExecuteError::Timeout
    } else {
        ExecuteError::Internal(truncate_chars(&description, MAX_ERROR_CHARS))
    }
}
