//! Pure saga transitions.
//!
//! Every function here takes the current instance plus the triggering input
//! and mutates it in memory. Nothing is persisted or published; the
//! orchestrator writes the result with a single compare-and-swap and then
//! flushes the outbox.

use chrono::{DateTime, Utc};
use common::CorrelationId;
use domain::WorkerProvisioningRequested;

use crate::compensation::CompensationExecutor;
use crate::contracts::{ResponseEvent, Step, WorkerEvent};
use crate::error::{Result, SagaError, StepFailure};
use crate::instance::{Direction, PendingCommand, SagaInstance, StepOutcome};
use crate::policy::RetryPolicy;
use crate::state::SagaState;

impl SagaInstance {
    /// Creates a saga for a validated request and dispatches the first step.
    pub(crate) fn initiate(
        correlation_id: CorrelationId,
        request: WorkerProvisioningRequested,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) -> Self {
        let mut saga = SagaInstance::new(correlation_id, request, now);
        saga.begin_step(Step::People, now, policy);
        saga
    }

    fn begin_step(&mut self, step: Step, now: DateTime<Utc>, policy: &RetryPolicy) {
        let command = self.forward_command(step);
        self.set_state(SagaState::pending_for(step), now);
        self.dispatch(command, now, policy);
    }

    /// Applies a participant response.
    ///
    /// A response whose idempotency key is not the one currently awaited
    /// (duplicates, late answers, answers for finished sagas) is rejected as
    /// stale and leaves the instance untouched.
    pub(crate) fn apply_response(
        &mut self,
        response: &ResponseEvent,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) -> Result<()> {
        let awaited = self
            .pending
            .as_ref()
            .is_some_and(|p| p.command.idempotency_key() == response.idempotency_key());
        let pending = match self.pending.take() {
            Some(pending) if awaited => pending,
            other => {
                self.pending = other;
                return Err(SagaError::StaleResponse {
                    correlation_id: self.correlation_id,
                    idempotency_key: response.idempotency_key().clone(),
                    state: self.state,
                });
            }
        };

        match (pending.command.is_compensation(), response.failure_reason()) {
            (true, None) => CompensationExecutor::on_confirmed(self, pending, now, policy),
            (true, Some(reason)) => {
                CompensationExecutor::on_rejected(self, pending, reason, now, policy)
            }
            (false, None) => self.complete_step(pending, now, policy),
            (false, Some(reason)) => {
                let failure = StepFailure::Participant {
                    step: pending.command.step(),
                    reason: reason.to_string(),
                };
                self.fail_step(pending, StepOutcome::Failed, failure, now, policy);
            }
        }
        Ok(())
    }

    /// Handles an expired deadline on the outstanding command.
    ///
    /// Returns `false` if nothing was due. Within the retry budget the same
    /// command is sent again; after it, a forward step fails with a timeout
    /// and a compensating step is abandoned.
    pub(crate) fn apply_timeout(&mut self, now: DateTime<Utc>, policy: &RetryPolicy) -> bool {
        let Some(pending) = self.pending.as_ref() else {
            return false;
        };
        if pending.deadline > now {
            return false;
        }

        if policy.can_retry(pending.attempts) {
            metrics::counter!("saga_step_retries_total").increment(1);
            tracing::warn!(
                correlation_id = %self.correlation_id,
                command = pending.command.command_type(),
                attempt = pending.attempts + 1,
                "resending command"
            );
            self.resend(now, policy);
            return true;
        }

        let Some(pending) = self.pending.take() else {
            return false;
        };
        if pending.command.is_compensation() {
            let reason = pending
                .last_failure
                .clone()
                .unwrap_or_else(|| "no response".to_string());
            CompensationExecutor::abandon(self, pending, reason, now, policy);
        } else {
            let failure = StepFailure::Timeout {
                step: pending.command.step(),
                attempts: pending.attempts,
            };
            self.fail_step(pending, StepOutcome::TimedOut, failure, now, policy);
        }
        true
    }

    /// Operator abort.
    ///
    /// A forward step in flight is failed as if the participant had rejected
    /// it. A saga that is already compensating is left alone.
    pub(crate) fn apply_abort(&mut self, now: DateTime<Utc>, policy: &RetryPolicy) -> Result<bool> {
        if self.state.is_terminal() {
            return Err(SagaError::AlreadyTerminal {
                correlation_id: self.correlation_id,
                state: self.state,
            });
        }
        if self.state.pending_forward_step().is_none() {
            return Ok(false);
        }
        let Some(pending) = self.pending.take() else {
            return Ok(false);
        };

        let failure = StepFailure::Aborted {
            step: pending.command.step(),
        };
        self.fail_step(pending, StepOutcome::Aborted, failure, now, policy);
        Ok(true)
    }

    fn complete_step(&mut self, pending: PendingCommand, now: DateTime<Utc>, policy: &RetryPolicy) {
        let step = pending.command.step();
        self.record(&pending, Direction::Forward, StepOutcome::Succeeded, None, now);

        match step.next() {
            Some(next) => {
                self.set_state(SagaState::PeopleCreated, now);
                self.begin_step(next, now, policy);
            }
            None => {
                self.set_state(SagaState::Completed, now);
                self.emit(WorkerEvent::WorkerProvisioned {
                    worker_request_id: self.worker_request_id.clone(),
                    correlation_id: self.correlation_id,
                });
            }
        }
    }

    fn fail_step(
        &mut self,
        pending: PendingCommand,
        outcome: StepOutcome,
        failure: StepFailure,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) {
        let step = failure.step();
        tracing::warn!(
            correlation_id = %self.correlation_id,
            %step,
            reason = %failure,
            "step failed, compensating"
        );
        self.record(&pending, Direction::Forward, outcome, Some(failure.to_string()), now);
        self.last_error = Some(failure.to_string());
        self.failure = Some(failure);
        self.set_state(SagaState::failed_for(step), now);
        CompensationExecutor::advance(self, now, policy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{Command, IdempotencyKey, OutboundMessage};
    use domain::{PersonPayload, SecurityPayload};
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(10), 3, Duration::from_secs(60))
    }

    fn started() -> (SagaInstance, DateTime<Utc>) {
        let now = Utc::now();
        let request = WorkerProvisioningRequested::new(
            "W1",
            PersonPayload::new("Ana"),
            SecurityPayload::new("ana"),
        );
        (
            SagaInstance::initiate(CorrelationId::new(), request, now, &policy()),
            now,
        )
    }

    fn pending_command(saga: &SagaInstance) -> Command {
        saga.pending().unwrap().command.clone()
    }

    fn last_command(saga: &SagaInstance) -> Command {
        saga.outbox()
            .iter()
            .rev()
            .find_map(|m| match m {
                OutboundMessage::Command(c) => Some(c.clone()),
                OutboundMessage::Event(_) => None,
            })
            .unwrap()
    }

    fn last_event(saga: &SagaInstance) -> WorkerEvent {
        match saga.outbox().last().unwrap() {
            OutboundMessage::Event(e) => e.clone(),
            other => panic!("expected event, got {other:?}"),
        }
    }

    fn succeed(saga: &mut SagaInstance, now: DateTime<Utc>) {
        let response = ResponseEvent::succeeded(&pending_command(saga));
        saga.apply_response(&response, now, &policy()).unwrap();
    }

    fn fail(saga: &mut SagaInstance, reason: &str, now: DateTime<Utc>) {
        let response = ResponseEvent::failed(&pending_command(saga), reason);
        saga.apply_response(&response, now, &policy()).unwrap();
    }

    fn expire(saga: &mut SagaInstance) -> DateTime<Utc> {
        let at = saga.pending().unwrap().deadline;
        assert!(saga.apply_timeout(at, &policy()));
        at
    }

    #[test]
    fn test_initiate_dispatches_people_step() {
        let (saga, _) = started();

        assert_eq!(saga.state(), SagaState::PeoplePending);
        assert_eq!(saga.outbox().len(), 1);
        let command = last_command(&saga);
        assert_eq!(command.command_type(), "CreatePersonRecord");
        assert_eq!(
            command.idempotency_key(),
            &IdempotencyKey::for_step(saga.correlation_id(), Step::People)
        );
    }

    #[test]
    fn test_happy_path() {
        let (mut saga, now) = started();

        succeed(&mut saga, now);
        assert_eq!(saga.state(), SagaState::SecurityPending);
        assert_eq!(last_command(&saga).command_type(), "CreateSecurityAccount");

        succeed(&mut saga, now);
        assert_eq!(saga.state(), SagaState::Completed);
        assert!(saga.pending().is_none());
        assert_eq!(saga.completed_steps(), vec![Step::People, Step::Security]);
        assert_eq!(
            last_event(&saga),
            WorkerEvent::WorkerProvisioned {
                worker_request_id: "W1".into(),
                correlation_id: saga.correlation_id(),
            }
        );

        let visited: Vec<_> = saga.history().iter().map(|c| c.to).collect();
        assert_eq!(
            visited,
            vec![
                SagaState::PeoplePending,
                SagaState::PeopleCreated,
                SagaState::SecurityPending,
                SagaState::Completed,
            ]
        );
    }

    #[test]
    fn test_security_rejection_compensates_people() {
        let (mut saga, now) = started();
        let people_key = pending_command(&saga).idempotency_key().clone();
        succeed(&mut saga, now);

        fail(&mut saga, "duplicate username", now);
        assert_eq!(saga.state(), SagaState::CompensatingPeople);
        let undo = last_command(&saga);
        assert_eq!(undo.command_type(), "DeletePersonRecord");
        assert_eq!(undo.idempotency_key(), &people_key.compensation());

        succeed(&mut saga, now);
        assert_eq!(saga.state(), SagaState::Compensated);
        assert_eq!(
            last_event(&saga),
            WorkerEvent::WorkerProvisioningFailed {
                worker_request_id: "W1".into(),
                correlation_id: saga.correlation_id(),
                reason: "duplicate username".to_string(),
                compensation_incomplete: false,
            }
        );
    }

    #[test]
    fn test_people_rejection_has_nothing_to_undo() {
        let (mut saga, now) = started();

        fail(&mut saga, "invalid document", now);

        assert_eq!(saga.state(), SagaState::Compensated);
        assert!(saga.pending().is_none());
        assert_eq!(saga.outbox().len(), 2);
        assert_eq!(last_event(&saga).event_type(), "WorkerProvisioningFailed");
    }

    #[test]
    fn test_duplicate_response_is_stale() {
        let (mut saga, now) = started();
        let response = ResponseEvent::succeeded(&pending_command(&saga));

        saga.apply_response(&response, now, &policy()).unwrap();
        let before = saga.history().len();
        let err = saga.apply_response(&response, now, &policy()).unwrap_err();

        assert!(matches!(err, SagaError::StaleResponse { .. }));
        assert_eq!(saga.history().len(), before);
        assert_eq!(saga.state(), SagaState::SecurityPending);
        assert!(saga.pending().is_some());
    }

    #[test]
    fn test_timeout_resends_same_key_then_fails() {
        let (mut saga, now) = started();
        let key = pending_command(&saga).idempotency_key().clone();

        assert!(!saga.apply_timeout(now, &policy()));

        expire(&mut saga);
        expire(&mut saga);
        assert_eq!(saga.state(), SagaState::PeoplePending);
        assert_eq!(saga.attempts("people"), 3);
        assert!(
            saga.outbox()
                .iter()
                .all(|m| matches!(m, OutboundMessage::Command(c) if c.idempotency_key() == &key))
        );

        // Budget spent; the timed-out create is still undone.
        expire(&mut saga);
        assert_eq!(saga.state(), SagaState::CompensatingPeople);
        assert_eq!(
            saga.failure(),
            Some(&StepFailure::Timeout {
                step: Step::People,
                attempts: 3
            })
        );
        assert_eq!(last_command(&saga).command_type(), "DeletePersonRecord");
    }

    #[test]
    fn test_backoff_grows_between_attempts() {
        let (mut saga, now) = started();
        let first = saga.pending().unwrap().deadline;
        assert_eq!(first - now, chrono::TimeDelta::seconds(10));

        let resent_at = expire(&mut saga);
        let second = saga.pending().unwrap().deadline;
        assert_eq!(second - resent_at, chrono::TimeDelta::seconds(20));
    }

    #[test]
    fn test_security_timeout_compensates_in_reverse_order() {
        let (mut saga, now) = started();
        succeed(&mut saga, now);

        for _ in 0..3 {
            expire(&mut saga);
        }
        assert_eq!(saga.state(), SagaState::CompensatingSecurity);
        assert_eq!(last_command(&saga).command_type(), "DeleteSecurityAccount");

        succeed(&mut saga, now);
        assert_eq!(saga.state(), SagaState::CompensatingPeople);
        assert_eq!(last_command(&saga).command_type(), "DeletePersonRecord");

        succeed(&mut saga, now);
        assert_eq!(saga.state(), SagaState::Compensated);

        let undone: Vec<_> = saga
            .steps()
            .iter()
            .filter(|r| r.direction == Direction::Compensation)
            .map(|r| r.step)
            .collect();
        assert_eq!(undone, vec![Step::Security, Step::People]);
    }

    #[test]
    fn test_rejected_compensation_is_retried_then_abandoned() {
        let (mut saga, now) = started();
        succeed(&mut saga, now);
        fail(&mut saga, "duplicate username", now);
        let undo_key = pending_command(&saga).idempotency_key().clone();

        fail(&mut saga, "people service down", now);
        assert_eq!(saga.state(), SagaState::CompensatingPeople);
        assert_eq!(
            saga.pending().unwrap().last_failure.as_deref(),
            Some("people service down")
        );

        // Resent after the backoff, still with the compensation key.
        let at = expire(&mut saga);
        assert_eq!(pending_command(&saga).idempotency_key(), &undo_key);
        fail(&mut saga, "people service down", at);
        expire(&mut saga);
        fail(&mut saga, "people service down", at);

        assert_eq!(saga.state(), SagaState::Compensated);
        assert!(saga.compensation_incomplete());
        assert_eq!(saga.compensation_failures().len(), 1);
        assert_eq!(saga.attempts("people-compensate"), 3);
        match last_event(&saga) {
            WorkerEvent::WorkerProvisioningFailed {
                reason,
                compensation_incomplete,
                ..
            } => {
                assert_eq!(reason, "duplicate username");
                assert!(compensation_incomplete);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_silent_compensation_is_abandoned() {
        let (mut saga, now) = started();
        succeed(&mut saga, now);
        fail(&mut saga, "duplicate username", now);

        for _ in 0..3 {
            expire(&mut saga);
        }

        assert_eq!(saga.state(), SagaState::Compensated);
        assert_eq!(saga.compensation_failures()[0].reason, "no response");
    }

    #[test]
    fn test_abort_pending_forward_step() {
        let (mut saga, now) = started();
        succeed(&mut saga, now);

        assert!(saga.apply_abort(now, &policy()).unwrap());

        assert_eq!(saga.state(), SagaState::CompensatingSecurity);
        assert_eq!(
            saga.failure(),
            Some(&StepFailure::Aborted {
                step: Step::Security
            })
        );
    }

    #[test]
    fn test_abort_during_compensation_is_noop() {
        let (mut saga, now) = started();
        succeed(&mut saga, now);
        fail(&mut saga, "duplicate username", now);
        let history = saga.history().len();

        assert!(!saga.apply_abort(now, &policy()).unwrap());
        assert_eq!(saga.history().len(), history);
    }

    #[test]
    fn test_abort_terminal_saga_fails() {
        let (mut saga, now) = started();
        fail(&mut saga, "invalid document", now);

        let err = saga.apply_abort(now, &policy()).unwrap_err();
        assert!(matches!(err, SagaError::AlreadyTerminal { .. }));
    }

    #[test]
    fn test_response_after_completion_is_stale() {
        let (mut saga, now) = started();
        let first = pending_command(&saga);
        succeed(&mut saga, now);
        succeed(&mut saga, now);

        let err = saga
            .apply_response(&ResponseEvent::failed(&first, "late"), now, &policy())
            .unwrap_err();
        assert!(matches!(err, SagaError::StaleResponse { .. }));
        assert_eq!(saga.state(), SagaState::Completed);
    }
}
