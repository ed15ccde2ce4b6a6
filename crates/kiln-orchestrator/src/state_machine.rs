//! Pure state machine for the task/attempt cycle
//!
//! This module has NO I/O. The control loop feeds it events and executes
//! the actions it returns.
//!
//! Key design principles:
//! - Pure function: transition(state, event) -> (state, actions)
//! - A task never gets more than `max_tries` attempts
//! - Invalid transitions go to Halted state (never panic)

/// Attempt cycle state for the current task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptState {
    /// No task in progress
    AwaitingTask,
    /// `tries` attempts have already been spent on the task
    Attempting { tries: usize, max_tries: usize },
    /// The last attempt satisfied the task
    Succeeded { tries: usize },
    /// Every allowed attempt failed
    Failed { tries: usize },
    /// The machine received an event it cannot handle
    Halted { error: String },
}

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptEvent {
    /// The curriculum proposed a task
    TaskProposed { task: String, max_tries: usize },
    /// Code generation yielded no usable unit
    NoCode { reason: String },
    /// The critic judged an executed unit
    Critiqued { success: bool },
    /// Terminal bookkeeping for the task is done
    Retired,
}

/// Side effects the control loop performs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptAction {
    /// Run attempt `number` (1-based)
    Attempt { number: usize },
    /// Promote the last code unit to the skill library
    StoreSkill,
    /// Move the task into the completed set
    RecordCompleted,
    /// Move the task into the failed set
    RecordFailed,
    /// Log activity
    LogActivity { message: String },
}

/// Pure state transition function
///
/// Takes current state and event, returns new state and actions to execute.
///
/// # Invalid Transitions
/// Any invalid transition results in a Halted state with a descriptive error.
/// This function never panics.
pub fn transition(state: AttemptState, event: AttemptEvent) -> (AttemptState, Vec<AttemptAction>) {
    match (state, event) {
        (AttemptState::AwaitingTask, AttemptEvent::TaskProposed { task, max_tries }) => {
            if max_tries == 0 {
                return (
                    AttemptState::Halted {
                        error: format!("Task '{}' was proposed with max_tries = 0", task),
                    },
                    vec![],
                );
            }
            (
                AttemptState::Attempting {
                    tries: 0,
                    max_tries,
                },
                vec![
                    AttemptAction::LogActivity {
                        message: format!("Starting task: {}", task),
                    },
                    AttemptAction::Attempt { number: 1 },
                ],
            )
        }

        (AttemptState::Attempting { tries, max_tries }, AttemptEvent::Critiqued { success: true }) => {
            let tries = tries + 1;
            (
                AttemptState::Succeeded { tries },
                vec![
                    AttemptAction::LogActivity {
                        message: format!("Task succeeded on attempt {}/{}", tries, max_tries),
                    },
                    AttemptAction::StoreSkill,
                    AttemptAction::RecordCompleted,
                ],
            )
        }

        (AttemptState::Attempting { tries, max_tries }, AttemptEvent::Critiqued { success: false }) => {
            failed_try(tries, max_tries, "Attempt failed".to_string())
        }

        (AttemptState::Attempting { tries, max_tries }, AttemptEvent::NoCode { reason }) => {
            failed_try(tries, max_tries, format!("Attempt produced no code: {}", reason))
        }

        (AttemptState::Succeeded { .. }, AttemptEvent::Retired)
        | (AttemptState::Failed { .. }, AttemptEvent::Retired) => (AttemptState::AwaitingTask, vec![]),

        (AttemptState::Halted { error }, event) => (
            AttemptState::Halted {
                error: format!("{} (then received {:?})", error, event),
            },
            vec![],
        ),

        (state, event) => (
            AttemptState::Halted {
                error: format!("Invalid attempt transition: {:?} cannot handle event {:?}", state, event),
            },
            vec![],
        ),
    }
}

fn failed_try(tries: usize, max_tries: usize, message: String) -> (AttemptState, Vec<AttemptAction>) {
    let tries = tries + 1;
    if tries < max_tries {
        (
            AttemptState::Attempting { tries, max_tries },
            vec![
                AttemptAction::LogActivity {
                    message: format!("{} ({}/{})", message, tries, max_tries),
                },
                AttemptAction::Attempt { number: tries + 1 },
            ],
        )
    } else {
        (
            AttemptState::Failed { tries },
            vec![
                AttemptAction::LogActivity {
                    message: format!("{} ({}/{}), giving up", message, tries, max_tries),
                },
                AttemptAction::RecordFailed,
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn propose(max_tries: usize) -> (AttemptState, Vec<AttemptAction>) {
        transition(
            AttemptState::AwaitingTask,
            AttemptEvent::TaskProposed {
                task: "Mine 1 wood log".to_string(),
                max_tries,
            },
        )
    }

    fn attempts(actions: &[AttemptAction]) -> usize {
        actions
            .iter()
            .filter(|a| matches!(a, AttemptAction::Attempt { .. }))
            .count()
    }

    #[test]
    fn test_success_on_first_attempt() {
        let (state, actions) = propose(5);
        assert_eq!(state, AttemptState::Attempting { tries: 0, max_tries: 5 });
        assert!(actions.contains(&AttemptAction::Attempt { number: 1 }));

        let (state, actions) = transition(state, AttemptEvent::Critiqued { success: true });
        assert_eq!(state, AttemptState::Succeeded { tries: 1 });
        assert!(actions.contains(&AttemptAction::StoreSkill));
        assert!(actions.contains(&AttemptAction::RecordCompleted));
        assert!(!actions.contains(&AttemptAction::RecordFailed));

        let (state, actions) = transition(state, AttemptEvent::Retired);
        assert_eq!(state, AttemptState::AwaitingTask);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_three_failures_then_success() {
        let (mut state, _) = propose(4);
        for _ in 0..3 {
            let (next, actions) = transition(state, AttemptEvent::Critiqued { success: false });
            assert_eq!(attempts(&actions), 1);
            state = next;
        }
        assert_eq!(state, AttemptState::Attempting { tries: 3, max_tries: 4 });

        let (state, actions) = transition(state, AttemptEvent::Critiqued { success: true });
        assert_eq!(state, AttemptState::Succeeded { tries: 4 });
        assert!(actions.contains(&AttemptAction::RecordCompleted));
    }

    #[test]
    fn test_exhaustion_records_failure() {
        let (state, _) = propose(2);
        let (state, actions) = transition(state, AttemptEvent::Critiqued { success: false });
        assert!(actions.contains(&AttemptAction::Attempt { number: 2 }));

        let (state, actions) = transition(state, AttemptEvent::Critiqued { success: false });
        assert_eq!(state, AttemptState::Failed { tries: 2 });
        assert!(actions.contains(&AttemptAction::RecordFailed));
        assert!(!actions.contains(&AttemptAction::StoreSkill));
        assert_eq!(attempts(&actions), 0);
    }

    #[test]
    fn test_no_code_counts_as_try() {
        let (state, _) = propose(1);
        let (state, actions) = transition(
            state,
            AttemptEvent::NoCode {
                reason: "no code block".to_string(),
            },
        );
        assert_eq!(state, AttemptState::Failed { tries: 1 });
        assert!(actions.contains(&AttemptAction::RecordFailed));
    }

    #[test]
    fn test_attempts_never_exceed_max_tries() {
        for max_tries in 1..8 {
            let (mut state, actions) = propose(max_tries);
            let mut executed = attempts(&actions);
            loop {
                let (next, actions) = transition(state, AttemptEvent::Critiqued { success: false });
                executed += attempts(&actions);
                state = next;
                if !matches!(state, AttemptState::Attempting { .. }) {
                    break;
                }
            }
            assert_eq!(executed, max_tries);
            assert_eq!(state, AttemptState::Failed { tries: max_tries });
        }
    }

    #[test]
    fn test_zero_max_tries_halts() {
        let (state, actions) = propose(0);
        assert!(matches!(state, AttemptState::Halted { .. }));
        assert!(actions.is_empty());
    }

    #[test]
    fn test_invalid_transition_never_panics() {
        let (state, _) = transition(AttemptState::AwaitingTask, AttemptEvent::Critiqued { success: true });
        match state {
            AttemptState::Halted { error } => assert!(error.contains("Invalid attempt transition")),
            other => panic!("Expected Halted, got {:?}", other),
        }

        let (state, _) = transition(
            AttemptState::Succeeded { tries: 1 },
            AttemptEvent::NoCode {
                reason: "x".to_string(),
            },
        );
        assert!(matches!(state, AttemptState::Halted { .. }));

        let (state, _) = transition(state, AttemptEvent::Retired);
        assert!(matches!(state, AttemptState::Halted { .. }));
    }
}
