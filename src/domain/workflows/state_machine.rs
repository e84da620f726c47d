/// Progress of a single job execution inside a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Dispatched,
    Running,
    Finished,
    Destroyed,
    RetryScheduled,
    Expired,
    /// The row was finished or deleted elsewhere before the worker got to it.
    Vanished,
    Fatal,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Dispatched => "dispatched",
            ExecutionState::Running => "running",
            ExecutionState::Finished => "finished",
            ExecutionState::Destroyed => "destroyed",
            ExecutionState::RetryScheduled => "retry_scheduled",
            ExecutionState::Expired => "expired",
            ExecutionState::Vanished => "vanished",
            ExecutionState::Fatal => "fatal",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionState::Dispatched | ExecutionState::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    Forbidden,
}

pub struct JobStateMachine;

impl JobStateMachine {
    pub fn can_transition(from: ExecutionState, to: ExecutionState) -> bool {
        matches!(
            (from, to),
            (ExecutionState::Dispatched, ExecutionState::Running)
                | (ExecutionState::Dispatched, ExecutionState::Vanished)
                | (ExecutionState::Dispatched, ExecutionState::Fatal)
                | (ExecutionState::Running, ExecutionState::Finished)
                | (ExecutionState::Running, ExecutionState::Destroyed)
                | (ExecutionState::Running, ExecutionState::RetryScheduled)
                | (ExecutionState::Running, ExecutionState::Expired)
                | (ExecutionState::Running, ExecutionState::Fatal)
        )
    }

    pub fn transition(
        from: ExecutionState,
        to: ExecutionState,
    ) -> Result<ExecutionState, TransitionError> {
        if Self::can_transition(from, to) {
            return Ok(to);
        }

        Err(TransitionError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ExecutionState; 8] = [
        ExecutionState::Dispatched,
        ExecutionState::Running,
        ExecutionState::Finished,
        ExecutionState::Destroyed,
        ExecutionState::RetryScheduled,
        ExecutionState::Expired,
        ExecutionState::Vanished,
        ExecutionState::Fatal,
    ];

    #[test]
    fn given_allowed_transitions_when_checked_should_be_allowed() {
        let cases = [
            (ExecutionState::Dispatched, ExecutionState::Running),
            (ExecutionState::Dispatched, ExecutionState::Vanished),
            (ExecutionState::Dispatched, ExecutionState::Fatal),
            (ExecutionState::Running, ExecutionState::Finished),
            (ExecutionState::Running, ExecutionState::Destroyed),
            (ExecutionState::Running, ExecutionState::RetryScheduled),
            (ExecutionState::Running, ExecutionState::Expired),
            (ExecutionState::Running, ExecutionState::Fatal),
        ];

        for (from, to) in cases {
            assert!(JobStateMachine::can_transition(from, to));
            assert_eq!(JobStateMachine::transition(from, to), Ok(to));
        }
    }

    #[test]
    fn given_terminal_states_when_transitioning_should_be_forbidden() {
        for from in ALL.into_iter().filter(ExecutionState::is_terminal) {
            for to in ALL {
                assert_eq!(
                    JobStateMachine::transition(from, to),
                    Err(TransitionError::Forbidden)
                );
            }
        }
    }

    #[test]
    fn given_dispatched_job_when_skipping_running_should_be_forbidden() {
        assert_eq!(
            JobStateMachine::transition(ExecutionState::Dispatched, ExecutionState::Finished),
            Err(TransitionError::Forbidden)
        );
    }
}
