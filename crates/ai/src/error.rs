use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    /// The backing service could not be reached or refused the call.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AiError {
    /// Whether re-running the same request later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AiError::Unavailable(_))
    }
}
