use carbon_core::ModelError;
use carbon_provider::ProviderError;
use serde::Serialize;
use thiserror::Error;

/// Stable classification of scheduler failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Input,
    Provider,
    NoValidWindow,
    MaxWaitExceeded,
    MissedOptimalWindow,
    Timeout,
}

impl ErrorKind {
    /// Process exit code for this kind.
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Input => 1,
            ErrorKind::Provider => 2,
            ErrorKind::MaxWaitExceeded => 10,
            ErrorKind::MissedOptimalWindow => 11,
            ErrorKind::Timeout => 12,
            ErrorKind::NoValidWindow => 20,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Input => "input",
            ErrorKind::Provider => "provider",
            ErrorKind::NoValidWindow => "no_valid_window",
            ErrorKind::MaxWaitExceeded => "max_wait_exceeded",
            ErrorKind::MissedOptimalWindow => "missed_optimal_window",
            ErrorKind::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulerError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("no valid window: {0}")]
    NoValidWindow(String),

    #[error("max wait exceeded: {0}")]
    MaxWaitExceeded(String),

    #[error("missed optimal window: {0}")]
    MissedOptimalWindow(String),

    #[error("timeout: {0}")]
    Timeout(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl SchedulerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedulerError::Input(_) => ErrorKind::Input,
            SchedulerError::Provider(_) => ErrorKind::Provider,
            SchedulerError::NoValidWindow(_) => ErrorKind::NoValidWindow,
            SchedulerError::MaxWaitExceeded(_) => ErrorKind::MaxWaitExceeded,
            SchedulerError::MissedOptimalWindow(_) => ErrorKind::MissedOptimalWindow,
            SchedulerError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.kind().exit_code()
    }

    /// Same kind, with `context: ` prepended to the message.
    pub fn context(self, context: impl std::fmt::Display) -> Self {
        match self {
            SchedulerError::Input(m) => SchedulerError::Input(format!("{context}: {m}")),
            SchedulerError::Provider(m) => SchedulerError::Provider(format!("{context}: {m}")),
            SchedulerError::NoValidWindow(m) => SchedulerError::NoValidWindow(format!("{context}: {m}")),
            SchedulerError::MaxWaitExceeded(m) => SchedulerError::MaxWaitExceeded(format!("{context}: {m}")),
            SchedulerError::MissedOptimalWindow(m) => {
                SchedulerError::MissedOptimalWindow(format!("{context}: {m}"))
            }
            SchedulerError::Timeout(m) => SchedulerError::Timeout(format!("{context}: {m}")),
        }
    }

    /// Wrap a provider failure, naming what was being fetched.
    pub fn from_provider(what: &str, err: ProviderError) -> Self {
        match err {
            ProviderError::DeadlineExceeded => SchedulerError::Timeout(format!("{what}: {err}")),
            other => SchedulerError::Provider(format!("{what}: {other}")),
        }
    }
}

impl From<ProviderError> for SchedulerError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::DeadlineExceeded => SchedulerError::Timeout(err.to_string()),
            other => SchedulerError::Provider(other.to_string()),
        }
    }
}

impl From<ModelError> for SchedulerError {
    fn from(err: ModelError) -> Self {
        SchedulerError::Input(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_stable() {
        assert_eq!(SchedulerError::Input("x".into()).exit_code(), 1);
        assert_eq!(SchedulerError::Provider("x".into()).exit_code(), 2);
        assert_eq!(SchedulerError::MaxWaitExceeded("x".into()).exit_code(), 10);
        assert_eq!(SchedulerError::MissedOptimalWindow("x".into()).exit_code(), 11);
        assert_eq!(SchedulerError::Timeout("x".into()).exit_code(), 12);
        assert_eq!(SchedulerError::NoValidWindow("x".into()).exit_code(), 20);
    }

    #[test]
    fn provider_errors_keep_their_kind() {
        let err: SchedulerError = ProviderError::DeadlineExceeded.into();
        assert_eq!(err.kind(), ErrorKind::Timeout);

        let err = SchedulerError::from_provider(
            "fetch forecast for DE",
            ProviderError::HttpStatus {
                status: 500,
                body: "oops".into(),
            },
        );
        assert_eq!(err.kind(), ErrorKind::Provider);
        assert!(err.to_string().contains("fetch forecast for DE"));

        let err: SchedulerError = ProviderError::Cancelled.into();
        assert_eq!(err.kind(), ErrorKind::Provider);
    }
}
