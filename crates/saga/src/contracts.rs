//! Messages exchanged with the participant services.
//!
//! Every message is an explicitly tagged type; nothing passes through the
//! saga as untyped JSON. The only logic here is idempotency key derivation.

use common::{CorrelationId, WorkerRequestId};
use domain::{PersonPayload, SecurityPayload};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Suffix appended to a forward step's key to form its compensation key.
pub const COMPENSATION_SUFFIX: &str = "-compensate";

/// Topic carrying commands for the people/HR service.
pub const PEOPLE_COMMANDS_TOPIC: &str = "people.commands";

/// Topic carrying commands for the security service.
pub const SECURITY_COMMANDS_TOPIC: &str = "security.commands";

/// Topic carrying the saga's outcome events.
pub const WORKER_EVENTS_TOPIC: &str = "worker.events";

/// A participant action in the saga, in forward order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    /// Create the person and contract record in the people service.
    People,
    /// Create the login account in the security service.
    Security,
}

impl Step {
    /// The stable step name that feeds key derivation.
    pub fn name(&self) -> &'static str {
        match self {
            Step::People => "people",
            Step::Security => "security",
        }
    }

    /// The step after this one, if any.
    pub fn next(&self) -> Option<Step> {
        match self {
            Step::People => Some(Step::Security),
            Step::Security => None,
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Deterministic identifier that lets a participant discard repeated
/// deliveries of the same command.
///
/// Forward keys are `UUIDv5(namespace = correlation ID, name = step name)`;
/// compensation keys append [`COMPENSATION_SUFFIX`] to the forward key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Derives the key for `step_name` within a saga.
    pub fn derive(correlation_id: CorrelationId, step_name: &str) -> Self {
        Self(Uuid::new_v5(&correlation_id.as_uuid(), step_name.as_bytes()).to_string())
    }

    /// Derives the forward key of `step`.
    pub fn for_step(correlation_id: CorrelationId, step: Step) -> Self {
        Self::derive(correlation_id, step.name())
    }

    /// The key of the compensation for the command carrying this key.
    pub fn compensation(&self) -> Self {
        Self(format!("{}{}", self.0, COMPENSATION_SUFFIX))
    }

    /// Returns true if this is a compensation key.
    pub fn is_compensation(&self) -> bool {
        self.0.ends_with(COMPENSATION_SUFFIX)
    }

    /// Wraps an already derived key, e.g. one received off the wire.
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outbound instruction to a participant service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Command {
    CreatePersonRecord {
        correlation_id: CorrelationId,
        idempotency_key: IdempotencyKey,
        person_payload: PersonPayload,
    },
    DeletePersonRecord {
        correlation_id: CorrelationId,
        idempotency_key: IdempotencyKey,
    },
    CreateSecurityAccount {
        correlation_id: CorrelationId,
        idempotency_key: IdempotencyKey,
        security_payload: SecurityPayload,
    },
    DeleteSecurityAccount {
        correlation_id: CorrelationId,
        idempotency_key: IdempotencyKey,
    },
}

impl Command {
    /// Builds the forward `CreatePersonRecord` command.
    pub fn create_person(correlation_id: CorrelationId, person_payload: PersonPayload) -> Self {
        Command::CreatePersonRecord {
            correlation_id,
            idempotency_key: IdempotencyKey::for_step(correlation_id, Step::People),
            person_payload,
        }
    }

    /// Builds the forward `CreateSecurityAccount` command.
    pub fn create_security_account(
        correlation_id: CorrelationId,
        security_payload: SecurityPayload,
    ) -> Self {
        Command::CreateSecurityAccount {
            correlation_id,
            idempotency_key: IdempotencyKey::for_step(correlation_id, Step::Security),
            security_payload,
        }
    }

    /// Builds the command undoing `step`, keyed off the step's forward key.
    pub fn compensation_for(
        step: Step,
        correlation_id: CorrelationId,
        forward_key: &IdempotencyKey,
    ) -> Self {
        let idempotency_key = forward_key.compensation();
        match step {
            Step::People => Command::DeletePersonRecord {
                correlation_id,
                idempotency_key,
            },
            Step::Security => Command::DeleteSecurityAccount {
                correlation_id,
                idempotency_key,
            },
        }
    }

    /// Returns the saga this command belongs to.
    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            Command::CreatePersonRecord { correlation_id, .. }
            | Command::DeletePersonRecord { correlation_id, .. }
            | Command::CreateSecurityAccount { correlation_id, .. }
            | Command::DeleteSecurityAccount { correlation_id, .. } => *correlation_id,
        }
    }

    /// Returns the command's idempotency key.
    pub fn idempotency_key(&self) -> &IdempotencyKey {
        match self {
            Command::CreatePersonRecord {
                idempotency_key, ..
            }
            | Command::DeletePersonRecord {
                idempotency_key, ..
            }
            | Command::CreateSecurityAccount {
                idempotency_key, ..
            }
            | Command::DeleteSecurityAccount {
                idempotency_key, ..
            } => idempotency_key,
        }
    }

    /// Returns the step this command performs or undoes.
    pub fn step(&self) -> Step {
        match self {
            Command::CreatePersonRecord { .. } | Command::DeletePersonRecord { .. } => Step::People,
            Command::CreateSecurityAccount { .. } | Command::DeleteSecurityAccount { .. } => {
                Step::Security
            }
        }
    }

    /// Returns true for commands that undo a previous step.
    pub fn is_compensation(&self) -> bool {
        matches!(
            self,
            Command::DeletePersonRecord { .. } | Command::DeleteSecurityAccount { .. }
        )
    }

    /// Returns the command type name.
    pub fn command_type(&self) -> &'static str {
        match self {
            Command::CreatePersonRecord { .. } => "CreatePersonRecord",
            Command::DeletePersonRecord { .. } => "DeletePersonRecord",
            Command::CreateSecurityAccount { .. } => "CreateSecurityAccount",
            Command::DeleteSecurityAccount { .. } => "DeleteSecurityAccount",
        }
    }
}

/// Inbound acknowledgment from a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ResponseEvent {
    StepSucceeded {
        correlation_id: CorrelationId,
        idempotency_key: IdempotencyKey,
    },
    StepFailed {
        correlation_id: CorrelationId,
        idempotency_key: IdempotencyKey,
        reason: String,
    },
}

impl ResponseEvent {
    /// Creates a success response for a command.
    pub fn succeeded(command: &Command) -> Self {
        ResponseEvent::StepSucceeded {
            correlation_id: command.correlation_id(),
            idempotency_key: command.idempotency_key().clone(),
        }
    }

    /// Creates a failure response for a command.
    pub fn failed(command: &Command, reason: impl Into<String>) -> Self {
        ResponseEvent::StepFailed {
            correlation_id: command.correlation_id(),
            idempotency_key: command.idempotency_key().clone(),
            reason: reason.into(),
        }
    }

    /// Returns the saga this response belongs to.
    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            ResponseEvent::StepSucceeded { correlation_id, .. }
            | ResponseEvent::StepFailed { correlation_id, .. } => *correlation_id,
        }
    }

    /// Returns the key of the command being answered.
    pub fn idempotency_key(&self) -> &IdempotencyKey {
        match self {
            ResponseEvent::StepSucceeded {
                idempotency_key, ..
            }
            | ResponseEvent::StepFailed {
                idempotency_key, ..
            } => idempotency_key,
        }
    }

    /// Returns the failure reason, or None for a success.
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            ResponseEvent::StepSucceeded { .. } => None,
            ResponseEvent::StepFailed { reason, .. } => Some(reason),
        }
    }
}

/// Outbound domain event announcing how provisioning ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum WorkerEvent {
    WorkerProvisioned {
        worker_request_id: WorkerRequestId,
        correlation_id: CorrelationId,
    },
    WorkerProvisioningFailed {
        worker_request_id: WorkerRequestId,
        correlation_id: CorrelationId,
        reason: String,
        compensation_incomplete: bool,
    },
}

impl WorkerEvent {
    /// Returns the request this event answers.
    pub fn worker_request_id(&self) -> &WorkerRequestId {
        match self {
            WorkerEvent::WorkerProvisioned {
                worker_request_id, ..
            }
            | WorkerEvent::WorkerProvisioningFailed {
                worker_request_id, ..
            } => worker_request_id,
        }
    }

    /// Returns the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            WorkerEvent::WorkerProvisioned { .. } => "WorkerProvisioned",
            WorkerEvent::WorkerProvisioningFailed { .. } => "WorkerProvisioningFailed",
        }
    }
}

/// A message staged in a saga's outbox until the bus accepts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum OutboundMessage {
    Command(Command),
    Event(WorkerEvent),
}

impl OutboundMessage {
    /// The bus topic this message is published on.
    pub fn topic(&self) -> &'static str {
        match self {
            OutboundMessage::Command(cmd) => match cmd.step() {
                Step::People => PEOPLE_COMMANDS_TOPIC,
                Step::Security => SECURITY_COMMANDS_TOPIC,
            },
            OutboundMessage::Event(_) => WORKER_EVENTS_TOPIC,
        }
    }

    /// The message type name.
    pub fn message_type(&self) -> &'static str {
        match self {
            OutboundMessage::Command(cmd) => cmd.command_type(),
            OutboundMessage::Event(event) => event.event_type(),
        }
    }
}
