//! Error taxonomy for the simulation engine.
//!
//! Two layers:
//! - [`CollaboratorError`]: a single external call failed. Always caught at
//!   the stage (or fetch) boundary and folded into a failed `StageOutput`.
//! - [`SimError`]: errors surfaced by the engine API itself.

use super::job::JobId;

/// Failure of one call to an external collaborator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("collaborator timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("collaborator returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("http error: {0}")]
    Http(String),
}

impl CollaboratorError {
    /// True for the timeout class. Stage failures log it as `timed_out` and
    /// count it under `stage_timeouts`.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CollaboratorError::Timeout { .. })
    }
}

/// Result type for collaborator calls.
pub type CollabResult<T> = std::result::Result<T, CollaboratorError>;

/// Engine-level errors.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// Rejected at submit time; the job is never created.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// A defect in the engine itself (broken scheduling invariant etc).
    #[error("internal job error: {0}")]
    JobInternal(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_error_display() {
        let err = SimError::InvalidInput("no candidates".to_string());
        assert!(err.to_string().contains("invalid input"));

        let err = SimError::JobNotFound(JobId("abc".to_string()));
        assert!(err.to_string().contains("job not found: abc"));

        let err = SimError::JobInternal("stage order violated".to_string());
        assert!(err.to_string().contains("internal job error"));
    }

    #[test]
    fn test_collaborator_timeout_is_flagged() {
        assert!(CollaboratorError::Timeout { after_ms: 10 }.is_timeout());
        assert!(!CollaboratorError::Unavailable("down".into()).is_timeout());
        assert!(CollaboratorError::Timeout { after_ms: 1500 }
            .to_string()
            .contains("1500 ms"));
    }
}
