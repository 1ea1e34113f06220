//! Saga instance: the persisted state of one provisioning flow.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{CorrelationId, WorkerRequestId};
use domain::{PersonPayload, SecurityPayload, WorkerProvisioningRequested};
use saga_store::{SagaRecord, Version};
use serde::{Deserialize, Serialize};

use crate::contracts::{
    COMPENSATION_SUFFIX, Command, IdempotencyKey, OutboundMessage, Step, WorkerEvent,
};
use crate::error::{CompensationFailure, StepFailure};
use crate::policy::RetryPolicy;
use crate::state::SagaState;

/// The saga type identifier stored with every record.
pub const SAGA_TYPE: &str = "WorkerProvisioning";

/// Whether a step record belongs to the forward path or to compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Compensation,
}

/// How a participant action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    /// The participant confirmed the forward command.
    Succeeded,
    /// The participant rejected the forward command.
    Failed,
    /// No answer within the retry budget; the participant may have acted.
    TimedOut,
    /// An operator aborted while the command was outstanding.
    Aborted,
    /// The participant confirmed the compensating command.
    Compensated,
    /// The compensating command was given up after its retry budget.
    Abandoned,
}

impl StepOutcome {
    /// Returns true if a forward step with this outcome may have left state
    /// behind in the participant and therefore has to be undone.
    pub fn needs_compensation(&self) -> bool {
        matches!(
            self,
            StepOutcome::Succeeded | StepOutcome::TimedOut | StepOutcome::Aborted
        )
    }
}

/// One participant action outcome. Appended, never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub step: Step,
    pub direction: Direction,
    pub idempotency_key: IdempotencyKey,
    pub outcome: StepOutcome,
    /// Sends of the command before this outcome was recorded.
    pub attempts: u32,
    pub reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// The single command a saga is currently waiting on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCommand {
    pub command: Command,
    pub attempts: u32,
    pub sent_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    /// Set when a compensating command was rejected and waits for a retry.
    pub last_failure: Option<String>,
}

/// A state change, kept for inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub from: SagaState,
    pub to: SagaState,
    pub at: DateTime<Utc>,
}

/// A worker-provisioning saga instance.
///
/// Owned by the orchestrator and only changed through the transitions in
/// `machine` and `compensation`; everything else here is read access and
/// bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaInstance {
    pub(crate) correlation_id: CorrelationId,
    pub(crate) worker_request_id: WorkerRequestId,
    pub(crate) person_payload: PersonPayload,
    pub(crate) security_payload: SecurityPayload,
    pub(crate) state: SagaState,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    /// Sends per command label ("people", "people-compensate", ...).
    pub(crate) attempts: BTreeMap<String, u32>,
    pub(crate) last_error: Option<String>,
    pub(crate) failure: Option<StepFailure>,
    pub(crate) steps: Vec<StepRecord>,
    pub(crate) pending: Option<PendingCommand>,
    pub(crate) compensation_incomplete: bool,
    pub(crate) compensation_failures: Vec<CompensationFailure>,
    pub(crate) history: Vec<StateChange>,
    pub(crate) outbox: Vec<OutboundMessage>,
    #[serde(skip)]
    pub(crate) version: Version,
}

impl SagaInstance {
    pub(crate) fn new(
        correlation_id: CorrelationId,
        request: WorkerProvisioningRequested,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            correlation_id,
            worker_request_id: request.worker_request_id,
            person_payload: request.person_payload,
            security_payload: request.security_payload,
            state: SagaState::Initiated,
            created_at: now,
            updated_at: now,
            attempts: BTreeMap::new(),
            last_error: None,
            failure: None,
            steps: Vec::new(),
            pending: None,
            compensation_incomplete: false,
            compensation_failures: Vec::new(),
            history: Vec::new(),
            outbox: Vec::new(),
            version: Version::initial(),
        }
    }

    /// Rebuilds an instance from its stored record.
    pub fn from_record(record: &SagaRecord) -> Result<Self, serde_json::Error> {
        let mut saga: SagaInstance = record.decode()?;
        saga.version = record.version;
        Ok(saga)
    }

    /// Serializes the instance into a store record.
    pub fn to_record(&self) -> Result<SagaRecord, serde_json::Error> {
        Ok(
            SagaRecord::from_state(self.correlation_id, SAGA_TYPE, self.state.as_str(), self)?
                .with_timestamps(self.created_at, self.updated_at)
                .with_deadline(self.pending.as_ref().map(|p| p.deadline))
                .with_outbox_pending(!self.outbox.is_empty()),
        )
    }

    pub(crate) fn set_state(&mut self, to: SagaState, now: DateTime<Utc>) {
        self.history.push(StateChange {
            from: self.state,
            to,
            at: now,
        });
        self.state = to;
        self.updated_at = now;
    }

    /// Sends a new command and starts waiting on it.
    pub(crate) fn dispatch(&mut self, command: Command, now: DateTime<Utc>, policy: &RetryPolicy) {
        *self.attempts.entry(attempt_label(&command)).or_insert(0) += 1;
        self.outbox.push(OutboundMessage::Command(command.clone()));
        self.pending = Some(PendingCommand {
            command,
            attempts: 1,
            sent_at: now,
            deadline: policy.deadline(now, 1),
            last_failure: None,
        });
        self.updated_at = now;
    }

    /// Sends the outstanding command again with the same idempotency key.
    pub(crate) fn resend(&mut self, now: DateTime<Utc>, policy: &RetryPolicy) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        pending.attempts += 1;
        pending.sent_at = now;
        pending.deadline = policy.deadline(now, pending.attempts);
        *self
            .attempts
            .entry(attempt_label(&pending.command))
            .or_insert(0) += 1;
        self.outbox
            .push(OutboundMessage::Command(pending.command.clone()));
        self.updated_at = now;
    }

    pub(crate) fn record(
        &mut self,
        pending: &PendingCommand,
        direction: Direction,
        outcome: StepOutcome,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.steps.push(StepRecord {
            step: pending.command.step(),
            direction,
            idempotency_key: pending.command.idempotency_key().clone(),
            outcome,
            attempts: pending.attempts,
            reason,
            recorded_at: now,
        });
        self.updated_at = now;
    }

    pub(crate) fn emit(&mut self, event: WorkerEvent) {
        self.outbox.push(OutboundMessage::Event(event));
    }

    /// Drops the first `count` outbox messages after the bus accepted them.
    pub(crate) fn mark_published(&mut self, count: usize) {
        let count = count.min(self.outbox.len());
        self.outbox.drain(..count);
    }

    /// The forward command for `step`, built from the request payloads.
    pub(crate) fn forward_command(&self, step: Step) -> Command {
        match step {
            Step::People => Command::create_person(self.correlation_id, self.person_payload.clone()),
            Step::Security => {
                Command::create_security_account(self.correlation_id, self.security_payload.clone())
            }
        }
    }
}

// Query methods
impl SagaInstance {
    /// Returns the correlation ID.
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Returns the ID of the request that started this saga.
    pub fn worker_request_id(&self) -> &WorkerRequestId {
        &self.worker_request_id
    }

    /// Returns the saga state.
    pub fn state(&self) -> SagaState {
        self.state
    }

    /// Returns the store version this instance was read at.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns when the saga was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the saga last changed.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns the step records in the order they were appended.
    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    /// Returns the forward steps that succeeded, in completion order.
    pub fn completed_steps(&self) -> Vec<Step> {
        self.steps
            .iter()
            .filter(|r| r.direction == Direction::Forward && r.outcome == StepOutcome::Succeeded)
            .map(|r| r.step)
            .collect()
    }

    /// Returns the outstanding command, if any.
    pub fn pending(&self) -> Option<&PendingCommand> {
        self.pending.as_ref()
    }

    /// Returns how many times commands with `label` were sent.
    pub fn attempts(&self, label: &str) -> u32 {
        self.attempts.get(label).copied().unwrap_or(0)
    }

    /// Returns the most recent error text, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Returns why the saga failed, if it did.
    pub fn failure(&self) -> Option<&StepFailure> {
        self.failure.as_ref()
    }

    /// Returns true if some compensation could not be confirmed.
    pub fn compensation_incomplete(&self) -> bool {
        self.compensation_incomplete
    }

    /// Returns the compensations that were given up.
    pub fn compensation_failures(&self) -> &[CompensationFailure] {
        &self.compensation_failures
    }

    /// Returns the state changes in order.
    pub fn history(&self) -> &[StateChange] {
        &self.history
    }

    /// Returns messages not yet accepted by the bus.
    pub fn outbox(&self) -> &[OutboundMessage] {
        &self.outbox
    }
}

/// Label under which sends of `command` are counted.
pub fn attempt_label(command: &Command) -> String {
    if command.is_compensation() {
        format!("{}{COMPENSATION_SUFFIX}", command.step())
    } else {
        command.step().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request() -> WorkerProvisioningRequested {
        WorkerProvisioningRequested::new("W1", PersonPayload::new("Ana"), SecurityPayload::new("ana"))
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(10), 3, Duration::from_secs(60))
    }

    #[test]
    fn test_new_instance() {
        let id = CorrelationId::new();
        let saga = SagaInstance::new(id, request(), Utc::now());

        assert_eq!(saga.correlation_id(), id);
        assert_eq!(saga.worker_request_id().as_str(), "W1");
        assert_eq!(saga.state(), SagaState::Initiated);
        assert!(saga.steps().is_empty());
        assert!(saga.pending().is_none());
        assert!(saga.outbox().is_empty());
    }

    #[test]
    fn test_dispatch_and_resend_share_the_key() {
        let now = Utc::now();
        let mut saga = SagaInstance::new(CorrelationId::new(), request(), now);
        let command = saga.forward_command(Step::People);

        saga.dispatch(command.clone(), now, &policy());
        saga.resend(now, &policy());

        let pending = saga.pending().unwrap();
        assert_eq!(pending.attempts, 2);
        assert_eq!(pending.command, command);
        assert_eq!(saga.attempts("people"), 2);
        assert_eq!(saga.outbox().len(), 2);
        assert_eq!(saga.outbox()[0], saga.outbox()[1]);
    }

    #[test]
    fn test_mark_published_drops_prefix() {
        let now = Utc::now();
        let mut saga = SagaInstance::new(CorrelationId::new(), request(), now);
        saga.dispatch(saga.forward_command(Step::People), now, &policy());
        saga.emit(WorkerEvent::WorkerProvisioned {
            worker_request_id: WorkerRequestId::from("W1"),
            correlation_id: saga.correlation_id(),
        });

        saga.mark_published(1);
        assert_eq!(saga.outbox().len(), 1);
        assert_eq!(saga.outbox()[0].message_type(), "WorkerProvisioned");

        saga.mark_published(5);
        assert!(saga.outbox().is_empty());
    }

    #[test]
    fn test_record_roundtrip_keeps_version() {
        let now = Utc::now();
        let mut saga = SagaInstance::new(CorrelationId::new(), request(), now);
        saga.set_state(SagaState::PeoplePending, now);
        saga.dispatch(saga.forward_command(Step::People), now, &policy());

        let mut record = saga.to_record().unwrap();
        assert_eq!(record.state, "PeoplePending");
        assert_eq!(record.saga_type, SAGA_TYPE);
        assert!(record.outbox_pending);
        assert_eq!(record.next_deadline, Some(policy().deadline(now, 1)));

        record.version = Version::new(4);
        let restored = SagaInstance::from_record(&record).unwrap();
        assert_eq!(restored.version(), Version::new(4));
        assert_eq!(restored.state(), SagaState::PeoplePending);
        assert_eq!(restored.pending(), saga.pending());
        assert_eq!(restored.history().len(), 1);
    }

    #[test]
    fn test_attempt_labels() {
        let id = CorrelationId::new();
        let forward = Command::create_person(id, PersonPayload::new("Ana"));
        let undo = Command::compensation_for(Step::People, id, forward.idempotency_key());

        assert_eq!(attempt_label(&forward), "people");
        assert_eq!(attempt_label(&undo), "people-compensate");
    }

    #[test]
    fn test_outcomes_needing_compensation() {
        assert!(StepOutcome::Succeeded.needs_compensation());
        assert!(StepOutcome::TimedOut.needs_compensation());
        assert!(StepOutcome::Aborted.needs_compensation());
        assert!(!StepOutcome::Failed.needs_compensation());
        assert!(!StepOutcome::Compensated.needs_compensation());
    }
}
