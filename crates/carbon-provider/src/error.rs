//! Provider error taxonomy and retry classification.

use thiserror::Error;

use crate::context::ContextError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("upstream returned status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("network error: {message}")]
    Network { message: String, timeout: bool },

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("invalid input: {0}")]
    Input(String),

    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("cache error: {0}")]
    Cache(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

impl ProviderError {
    /// Transient failures worth another attempt: 429, 5xx, network
    /// timeouts and deadline expiry. Cancellation never is.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Network { timeout, .. } => *timeout,
            ProviderError::DeadlineExceeded => true,
            _ => false,
        }
    }
}

impl From<ContextError> for ProviderError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => ProviderError::Cancelled,
            ContextError::DeadlineExceeded => ProviderError::DeadlineExceeded,
        }
    }
}
