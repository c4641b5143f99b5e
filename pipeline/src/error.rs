use thiserror::Error;

/// Error kinds the coordinator distinguishes. Verdicts are not errors:
/// compile failures, wrong answers, and limit breaches flow through the
/// verdict column instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed request at intake; nothing was persisted.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A row referenced by a queue message no longer exists.
    #[error("not found: {0}")]
    NotFound(String),

    /// Database or queue failure that may succeed on retry. Intake surfaces
    /// this after compensation has run.
    #[error("transient storage failure: {0}")]
    TransientStorage(anyhow::Error),

    /// The judging work directory or child process could not be set up.
    #[error("sandbox setup failed: {0}")]
    SandboxSetup(String),

    /// Boot-time misconfiguration; the process exits non-zero.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::TransientStorage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(
            PipelineError::TransientStorage(anyhow::anyhow!("connection reset")).is_retryable()
        );
        assert!(!PipelineError::InvalidInput("empty source".into()).is_retryable());
        assert!(!PipelineError::NotFound("submission 7".into()).is_retryable());
        assert!(!PipelineError::Fatal("no DATABASE_URL".into()).is_retryable());
    }
}
