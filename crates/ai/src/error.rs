//! Error types for external capability calls.

use std::time::Duration;

/// Failure reported by a generation or evaluation backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CapabilityError {
    /// Quota or rate limit hit; worth retrying after a delay
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Transport-level failure
    #[error("request failed: {0}")]
    Request(String),

    /// Non-success status from the backend
    #[error("backend returned status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// Backend answered with no usable content
    #[error("empty response")]
    EmptyResponse,

    /// Backend answered with content of the wrong shape
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl CapabilityError {
    /// Only resource exhaustion is retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceExhausted(_))
    }
}

/// Result of an adapter call that callers pattern-match on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    /// Precondition violated by the caller
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Backend call failed after retries
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// Backend output could not be interpreted
    #[error("unparsable output: {0}")]
    Parse(String),

    /// Call exceeded its deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Worker task panicked or was aborted
    #[error("evaluation task failed: {0}")]
    Task(String),
}
