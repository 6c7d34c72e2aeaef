//! Errors an integration reports from its setup routine

use thiserror::Error;

/// Why a config entry could not be set up
///
/// The variant decides what the config entry manager does next: `NotReady`
/// schedules another attempt, the others leave the entry in an error state
/// until it is reloaded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    /// The device or service is not reachable yet; setup will be retried
    #[error("not ready: {0}")]
    NotReady(String),

    /// Credentials were rejected; retrying will not help
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Setup failed permanently
    #[error("setup failed: {0}")]
    Failed(String),
}

impl SetupError {
    /// Whether the manager should schedule another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, SetupError::NotReady(_))
    }

    /// Human-readable reason, without the variant prefix
    pub fn reason(&self) -> &str {
        match self {
            SetupError::NotReady(reason)
            | SetupError::AuthFailed(reason)
            | SetupError::Failed(reason) => reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_not_ready_is_retryable() {
        assert!(SetupError::NotReady("timeout".into()).is_retryable());
        assert!(!SetupError::AuthFailed("bad token".into()).is_retryable());
        assert!(!SetupError::Failed("unsupported".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = SetupError::NotReady("connection refused".into());
        assert_eq!(err.to_string(), "not ready: connection refused");
        assert_eq!(err.reason(), "connection refused");
    }
}
