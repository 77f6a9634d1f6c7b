//! Status transition rules and validation.

use thiserror::Error;

use super::task::TaskStatus;

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
    #[error("cannot transition from terminal state {state:?}")]
    FromTerminalState { state: TaskStatus },
}

pub struct StatusTransition;

impl StatusTransition {
    /// Status is monotonic except the blocked<->running cycle. Terminal
    /// states never transition.
    pub fn validate(from: TaskStatus, to: TaskStatus) -> Result<(), TransitionError> {
        if from.is_terminal() {
            return Err(TransitionError::FromTerminalState { state: from });
        }

        let is_valid = match (from, to) {
            (TaskStatus::Pending, TaskStatus::Running) => true,
            // A spawn that fails before any worker attaches still has to
            // land the task in a terminal state.
            (TaskStatus::Pending, TaskStatus::Error) => true,

            (TaskStatus::Running, TaskStatus::Complete)
            | (TaskStatus::Running, TaskStatus::Error)
            | (TaskStatus::Running, TaskStatus::Stopped)
            | (TaskStatus::Running, TaskStatus::Blocked) => true,

            (TaskStatus::Blocked, TaskStatus::Running)
            | (TaskStatus::Blocked, TaskStatus::Stopped) => true,

            _ => false,
        };

        if is_valid {
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition { from, to })
        }
    }

    pub fn is_terminal(status: TaskStatus) -> bool {
        status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        assert!(StatusTransition::validate(TaskStatus::Pending, TaskStatus::Running).is_ok());
        assert!(StatusTransition::validate(TaskStatus::Running, TaskStatus::Blocked).is_ok());
        assert!(StatusTransition::validate(TaskStatus::Blocked, TaskStatus::Running).is_ok());
        assert!(StatusTransition::validate(TaskStatus::Running, TaskStatus::Complete).is_ok());
        assert!(StatusTransition::validate(TaskStatus::Running, TaskStatus::Error).is_ok());
        assert!(StatusTransition::validate(TaskStatus::Running, TaskStatus::Stopped).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        assert!(StatusTransition::validate(TaskStatus::Pending, TaskStatus::Complete).is_err());
        assert!(StatusTransition::validate(TaskStatus::Pending, TaskStatus::Blocked).is_err());
        assert!(StatusTransition::validate(TaskStatus::Blocked, TaskStatus::Complete).is_err());
    }

    #[test]
    fn terminal_states_never_transition() {
        for terminal in [TaskStatus::Complete, TaskStatus::Error, TaskStatus::Stopped] {
            assert!(matches!(
                StatusTransition::validate(terminal, TaskStatus::Running),
                Err(TransitionError::FromTerminalState { .. })
            ));
        }
    }
}
