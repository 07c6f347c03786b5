//! Executor state machine
//!
//! ```text
//! Idle -> Validating -> Executing -> Success -> Idle
//!             |             |
//!             +-> Error <---+-------> Idle
//! ```

use crate::error::StateMachineError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Executor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorState {
    /// Ready for a submission
    Idle,
    /// Request schema gate running
    Validating,
    /// Agent call in flight
    Executing,
    /// Result accepted, being written
    Success,
    /// Error artifact being written
    Error,
}

impl ExecutorState {
    /// All states
    pub const ALL: [Self; 5] = [
        Self::Idle,
        Self::Validating,
        Self::Executing,
        Self::Success,
        Self::Error,
    ];

    /// Check if a submission is in flight
    #[inline]
    #[must_use]
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle)
    }

    /// Check if this is `Success` or `Error`
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl Display for ExecutorState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Executing => "executing",
            Self::Success => "success",
            Self::Error => "error",
        })
    }
}

/// Validate a state transition
///
/// # Errors
///
/// Returns [`StateMachineError::IllegalTransition`] if `to` is not reachable
/// from `from` in one step.
pub fn validate_transition(
    from: ExecutorState,
    to: ExecutorState,
) -> Result<(), StateMachineError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(StateMachineError::IllegalTransition { from, to })
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: ExecutorState) -> Vec<ExecutorState> {
    use ExecutorState::{Error, Executing, Idle, Success, Validating};
    match from {
        Idle => vec![Validating],
        Validating => vec![Executing, Error],
        Executing => vec![Success, Error],
        Success | Error => vec![Idle],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use ExecutorState::{Error, Executing, Idle, Success, Validating};

    #[test]
    fn happy_path_is_legal() {
        let path = [Idle, Validating, Executing, Success, Idle];
        for pair in path.windows(2) {
            assert!(validate_transition(pair[0], pair[1]).is_ok(), "{pair:?}");
        }
    }

    #[test]
    fn validation_failure_skips_executing() {
        assert!(validate_transition(Validating, Error).is_ok());
        assert!(validate_transition(Validating, Success).is_err());
    }

    #[test]
    fn idle_cannot_jump_to_executing() {
        assert_eq!(
            validate_transition(Idle, Executing),
            Err(StateMachineError::IllegalTransition {
                from: Idle,
                to: Executing
            })
        );
    }

    #[test]
    fn terminal_states_only_return_to_idle() {
        for state in [Success, Error] {
            assert!(state.is_terminal());
            assert_eq!(allowed_transitions(state), vec![Idle]);
        }
    }

    fn any_state() -> impl Strategy<Value = ExecutorState> {
        proptest::sample::select(ExecutorState::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn validate_agrees_with_table(from in any_state(), to in any_state()) {
            let listed = allowed_transitions(from).contains(&to);
            prop_assert_eq!(validate_transition(from, to).is_ok(), listed);
        }

        #[test]
        fn no_self_loops(state in any_state()) {
            prop_assert!(validate_transition(state, state).is_err());
        }

        #[test]
        fn every_state_returns_to_idle(start in any_state()) {
            let mut state = start;
            for _ in 0..4 {
                if state == Idle {
                    break;
                }
                let next = *allowed_transitions(state).last().unwrap();
                state = next;
            }
            prop_assert_eq!(state, Idle);
        }
    }
}
