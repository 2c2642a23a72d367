use std::time::Duration;
use thiserror::Error;

/// Generic text shown to end users whenever an answer cannot be produced.
pub const USER_FACING_ERROR: &str = "Something went wrong. Try again!";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No question in the request")]
    EmptyQuestion,

    #[error("Invalid subject \"{0}\". Must be one of: biology, physics, chemistry")]
    InvalidSubject(String),

    #[error("subject classification failed: {0:#}")]
    Classification(#[source] anyhow::Error),

    #[error("question condensation failed: {0:#}")]
    Condensation(#[source] anyhow::Error),

    #[error("retrieval failed: {0:#}")]
    Retrieval(#[source] anyhow::Error),

    #[error("answer generation failed: {0:#}")]
    Generation(#[source] anyhow::Error),

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    #[error("client disconnected before the answer completed")]
    Cancelled,

    #[error("invalid pipeline transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::chat::PipelineState,
        to: crate::chat::PipelineState,
    },

    #[error("stream protocol violation: {0}")]
    Protocol(#[from] crate::stream::EncodeError),
}

impl PipelineError {
    /// Input validation failures are rejected before any upstream call.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::EmptyQuestion | Self::InvalidSubject(_))
    }

    /// Message safe to show to the end user. Upstream details never leak.
    pub fn user_message(&self) -> String {
        if self.is_validation() {
            self.to_string()
        } else {
            USER_FACING_ERROR.to_string()
        }
    }
}
