//! Saga state machine.

use serde::{Deserialize, Serialize};

use crate::contracts::Step;

/// The state of a worker-provisioning saga.
///
/// Forward path:
/// ```text
/// Initiated ──► PeoplePending ──► PeopleCreated ──► SecurityPending ──► Completed
/// ```
/// Failure path, entered from either pending state:
/// ```text
/// PeopleFailed / SecurityFailed ──► [CompensatingSecurity] ──► [CompensatingPeople] ──► Compensated
/// ```
/// A compensating state is only visited for steps that need undoing.
///
/// `Initiated`, `PeopleCreated`, `PeopleFailed` and `SecurityFailed` are passed through
/// inside a single transition and never persisted on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// Saga created, no command sent yet.
    #[default]
    Initiated,

    /// `CreatePersonRecord` is outstanding.
    PeoplePending,

    /// The people service created the person record.
    PeopleCreated,

    /// `CreateSecurityAccount` is outstanding.
    SecurityPending,

    /// Both participants succeeded (terminal state).
    Completed,

    /// The people step failed.
    PeopleFailed,

    /// The security step failed.
    SecurityFailed,

    /// `DeleteSecurityAccount` is outstanding.
    CompensatingSecurity,

    /// `DeletePersonRecord` is outstanding.
    CompensatingPeople,

    /// Compensation finished after a failure (terminal state).
    Compensated,
}

impl SagaState {
    /// Every state, in declaration order.
    pub const ALL: [SagaState; 10] = [
        SagaState::Initiated,
        SagaState::PeoplePending,
        SagaState::PeopleCreated,
        SagaState::SecurityPending,
        SagaState::Completed,
        SagaState::PeopleFailed,
        SagaState::SecurityFailed,
        SagaState::CompensatingSecurity,
        SagaState::CompensatingPeople,
        SagaState::Compensated,
    ];

    /// States in which a command is outstanding and a deadline runs.
    pub const AWAITING: [SagaState; 4] = [
        SagaState::PeoplePending,
        SagaState::SecurityPending,
        SagaState::CompensatingSecurity,
        SagaState::CompensatingPeople,
    ];

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Completed | SagaState::Compensated)
    }

    /// Returns the forward step awaited in this state, if any.
    pub fn pending_forward_step(&self) -> Option<Step> {
        match self {
            SagaState::PeoplePending => Some(Step::People),
            SagaState::SecurityPending => Some(Step::Security),
            _ => None,
        }
    }

    /// The state entered when `step` is dispatched forward.
    pub fn pending_for(step: Step) -> Self {
        match step {
            Step::People => SagaState::PeoplePending,
            Step::Security => SagaState::SecurityPending,
        }
    }

    /// The state entered when `step` fails.
    pub fn failed_for(step: Step) -> Self {
        match step {
            Step::People => SagaState::PeopleFailed,
            Step::Security => SagaState::SecurityFailed,
        }
    }

    /// The state entered while `step` is being compensated.
    pub fn compensating_for(step: Step) -> Self {
        match step {
            Step::People => SagaState::CompensatingPeople,
            Step::Security => SagaState::CompensatingSecurity,
        }
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Initiated => "Initiated",
            SagaState::PeoplePending => "PeoplePending",
            SagaState::PeopleCreated => "PeopleCreated",
            SagaState::SecurityPending => "SecurityPending",
            SagaState::Completed => "Completed",
            SagaState::PeopleFailed => "PeopleFailed",
            SagaState::SecurityFailed => "SecurityFailed",
            SagaState::CompensatingSecurity => "CompensatingSecurity",
            SagaState::CompensatingPeople => "CompensatingPeople",
            SagaState::Compensated => "Compensated",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_initiated() {
        assert_eq!(SagaState::default(), SagaState::Initiated);
    }

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<_> = SagaState::ALL
            .iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(terminal, [&SagaState::Completed, &SagaState::Compensated]);
    }

    #[test]
    fn test_awaiting_states_are_not_terminal() {
        for state in SagaState::AWAITING {
            assert!(!state.is_terminal(), "{state} should not be terminal");
        }
    }

    #[test]
    fn test_step_mappings() {
        assert_eq!(SagaState::pending_for(Step::People), SagaState::PeoplePending);
        assert_eq!(SagaState::failed_for(Step::Security), SagaState::SecurityFailed);
        assert_eq!(
            SagaState::compensating_for(Step::People),
            SagaState::CompensatingPeople
        );
        assert_eq!(
            SagaState::SecurityPending.pending_forward_step(),
            Some(Step::Security)
        );
        assert_eq!(SagaState::CompensatingPeople.pending_forward_step(), None);
    }

    #[test]
    fn test_display_matches_serialization() {
        for state in SagaState::ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state));
            let deserialized: SagaState = serde_json::from_str(&json).unwrap();
            assert_eq!(state, deserialized);
        }
    }
}
