//! Config Entry State Machine
//!
//! ```text
//! NotLoaded → SetupInProgress → Loaded
//!                            ↘ SetupError → SetupInProgress (reload)
//!                            ↘ SetupRetry → SetupInProgress (scheduled retry)
//!                            ↘ MigrationError (terminal)
//!
//! Loaded/SetupError/SetupRetry → UnloadInProgress → NotLoaded
//!                                                 ↘ FailedUnload (terminal)
//! ```

use std::time::Duration;

use crate::entry::ConfigEntryState;
use thiserror::Error;

/// Error when an invalid state transition is attempted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid state transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: ConfigEntryState,
    pub to: ConfigEntryState,
}

impl ConfigEntryState {
    /// States reachable from this one in a single step
    pub fn successors(self) -> &'static [ConfigEntryState] {
        use ConfigEntryState::*;

        match self {
            NotLoaded => &[SetupInProgress],
            SetupInProgress => &[Loaded, SetupError, SetupRetry, MigrationError],
            SetupError | SetupRetry => &[SetupInProgress, UnloadInProgress],
            Loaded => &[UnloadInProgress],
            UnloadInProgress => &[NotLoaded, FailedUnload],
            MigrationError | FailedUnload => &[],
        }
    }

    /// Attempt a transition to a new state
    pub fn try_transition(
        self,
        to: ConfigEntryState,
    ) -> Result<ConfigEntryState, InvalidTransition> {
        if self.successors().contains(&to) {
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }

    /// Check if a transition is valid without performing it
    pub fn can_transition_to(self, to: ConfigEntryState) -> bool {
        self.successors().contains(&to)
    }

    /// No way out of this state
    pub fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }
}

/// Delay before setup attempt number `tries + 1`
///
/// `2^min(tries, 4) * 5` seconds (5s, 10s, 20s, 40s, then 80s) plus up to
/// 100ms of jitter so entries failing together do not retry in lockstep.
pub fn retry_delay(tries: u32) -> Duration {
    let base = Duration::from_secs(5 * 2_u64.pow(tries.min(4)));
    let jitter = Duration::from_millis(rand::random::<u64>() % 100);
    base + jitter
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConfigEntryState::*;

    const ALL: [ConfigEntryState; 8] = [
        NotLoaded,
        SetupInProgress,
        Loaded,
        SetupError,
        SetupRetry,
        MigrationError,
        UnloadInProgress,
        FailedUnload,
    ];

    #[test]
    fn test_setup_paths() {
        for outcome in [Loaded, SetupError, SetupRetry, MigrationError] {
            let state = NotLoaded.try_transition(SetupInProgress).unwrap();
            assert_eq!(state.try_transition(outcome), Ok(outcome));
        }
    }

    #[test]
    fn test_retry_loop() {
        let state = SetupRetry.try_transition(SetupInProgress).unwrap();
        let state = state.try_transition(SetupRetry).unwrap();
        let state = state.try_transition(SetupInProgress).unwrap();
        assert_eq!(state.try_transition(Loaded), Ok(Loaded));
    }

    #[test]
    fn test_unload_paths() {
        for start in [Loaded, SetupError, SetupRetry] {
            let state = start.try_transition(UnloadInProgress).unwrap();
            assert!(state.can_transition_to(NotLoaded));
            assert!(state.can_transition_to(FailedUnload));
        }
    }

    #[test]
    fn test_shortcuts_rejected() {
        assert!(!NotLoaded.can_transition_to(Loaded));
        assert!(!Loaded.can_transition_to(NotLoaded));
        assert!(!Loaded.can_transition_to(SetupInProgress));
        assert!(!SetupInProgress.can_transition_to(NotLoaded));
        assert!(!UnloadInProgress.can_transition_to(Loaded));
    }

    #[test]
    fn test_terminal_states() {
        for terminal in [MigrationError, FailedUnload] {
            assert!(terminal.is_terminal());
            for to in ALL {
                assert!(!terminal.can_transition_to(to));
            }
        }
        assert!(!Loaded.is_terminal());
    }

    #[test]
    fn test_error_display() {
        let err = NotLoaded.try_transition(Loaded).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid state transition from not_loaded to loaded"
        );
    }

    #[test]
    fn test_retry_delay_backoff() {
        let expected = [5, 10, 20, 40, 80, 80, 80];
        for (tries, base) in expected.into_iter().enumerate() {
            let delay = retry_delay(tries as u32);
            let base = Duration::from_secs(base);
            assert!(delay >= base && delay < base + Duration::from_millis(100));
        }
    }
}
