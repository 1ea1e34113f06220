//! Compensation: undo completed steps in reverse order.

use chrono::{DateTime, Utc};

use crate::contracts::{Command, Step, WorkerEvent};
use crate::error::CompensationFailure;
use crate::instance::{Direction, PendingCommand, SagaInstance, StepOutcome};
use crate::policy::RetryPolicy;
use crate::state::SagaState;

/// Drives a failed saga through its compensating commands.
///
/// Every forward step whose outcome may have left state in a participant is
/// undone, most recently completed first. A compensation that cannot be
/// confirmed within the retry budget is abandoned and flagged; the executor
/// still moves on to the remaining steps and always reaches `Compensated`.
pub(crate) struct CompensationExecutor;

impl CompensationExecutor {
    /// Sends the next compensating command, or finishes the saga if there is
    /// nothing left to undo.
    pub(crate) fn advance(saga: &mut SagaInstance, now: DateTime<Utc>, policy: &RetryPolicy) {
        match Self::next_to_undo(saga) {
            Some((step, command)) => {
                saga.set_state(SagaState::compensating_for(step), now);
                saga.dispatch(command, now, policy);
                tracing::info!(
                    correlation_id = %saga.correlation_id,
                    %step,
                    "compensating step"
                );
            }
            None => Self::finish(saga, now),
        }
    }

    /// The participant confirmed the compensating command.
    pub(crate) fn on_confirmed(
        saga: &mut SagaInstance,
        pending: PendingCommand,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) {
        saga.record(
            &pending,
            Direction::Compensation,
            StepOutcome::Compensated,
            None,
            now,
        );
        Self::advance(saga, now, policy);
    }

    /// The participant rejected the compensating command. It is sent again
    /// once the backoff elapses, unless the budget is spent.
    pub(crate) fn on_rejected(
        saga: &mut SagaInstance,
        mut pending: PendingCommand,
        reason: &str,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) {
        saga.last_error = Some(reason.to_string());
        if policy.can_retry(pending.attempts) {
            tracing::warn!(
                correlation_id = %saga.correlation_id,
                step = %pending.command.step(),
                attempts = pending.attempts,
                reason,
                "compensation rejected, will retry"
            );
            pending.deadline = policy.deadline(now, pending.attempts);
            pending.last_failure = Some(reason.to_string());
            saga.pending = Some(pending);
            saga.updated_at = now;
        } else {
            Self::abandon(saga, pending, reason.to_string(), now, policy);
        }
    }

    /// Gives up on the outstanding compensating command and continues with
    /// the remaining steps.
    pub(crate) fn abandon(
        saga: &mut SagaInstance,
        pending: PendingCommand,
        reason: String,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) {
        let failure = CompensationFailure {
            step: pending.command.step(),
            attempts: pending.attempts,
            reason: reason.clone(),
        };
        metrics::counter!("saga_compensation_abandoned_total").increment(1);
        tracing::error!(
            correlation_id = %saga.correlation_id,
            error = %failure,
            "compensation abandoned, manual follow-up required"
        );
        saga.record(
            &pending,
            Direction::Compensation,
            StepOutcome::Abandoned,
            Some(reason),
            now,
        );
        saga.last_error = Some(failure.to_string());
        saga.compensation_incomplete = true;
        saga.compensation_failures.push(failure);
        Self::advance(saga, now, policy);
    }

    /// Finds the most recently completed step that still has to be undone.
    fn next_to_undo(saga: &SagaInstance) -> Option<(Step, Command)> {
        let handled = |step: Step| {
            saga.steps
                .iter()
                .any(|r| r.step == step && r.direction == Direction::Compensation)
        };

        saga.steps
            .iter()
            .rev()
            .filter(|r| r.direction == Direction::Forward && r.outcome.needs_compensation())
            .find(|r| !handled(r.step))
            .map(|r| {
                (
                    r.step,
                    Command::compensation_for(r.step, saga.correlation_id, &r.idempotency_key),
                )
            })
    }

    fn finish(saga: &mut SagaInstance, now: DateTime<Utc>) {
        saga.pending = None;
        saga.set_state(SagaState::Compensated, now);

        let reason = saga
            .failure
            .as_ref()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "saga failed".to_string());
        saga.emit(WorkerEvent::WorkerProvisioningFailed {
            worker_request_id: saga.worker_request_id.clone(),
            correlation_id: saga.correlation_id,
            reason,
            compensation_incomplete: saga.compensation_incomplete,
        });
    }
}
