//! Run state of the platform

use serde::{Deserialize, Serialize};

/// Lifecycle state of the running platform
///
/// ```text
/// NotRunning → Starting → Running → Stopping → FinalWrite → Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreState {
    #[default]
    NotRunning,
    Starting,
    Running,
    Stopping,
    FinalWrite,
    Stopped,
}

impl CoreState {
    /// Start hooks have fired (or are firing)
    pub fn is_running(self) -> bool {
        matches!(self, CoreState::Starting | CoreState::Running)
    }

    /// Shutdown has begun but not finished
    pub fn is_stopping(self) -> bool {
        matches!(self, CoreState::Stopping | CoreState::FinalWrite)
    }
}

impl std::fmt::Display for CoreState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CoreState::NotRunning => "NOT_RUNNING",
            CoreState::Starting => "STARTING",
            CoreState::Running => "RUNNING",
            CoreState::Stopping => "STOPPING",
            CoreState::FinalWrite => "FINAL_WRITE",
            CoreState::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_states() {
        assert!(CoreState::Starting.is_running());
        assert!(CoreState::Running.is_running());
        assert!(!CoreState::NotRunning.is_running());
        assert!(!CoreState::Stopping.is_running());
    }

    #[test]
    fn test_stopping_states() {
        assert!(CoreState::Stopping.is_stopping());
        assert!(CoreState::FinalWrite.is_stopping());
        assert!(!CoreState::Stopped.is_stopping());
        assert!(!CoreState::Running.is_stopping());
    }
}
