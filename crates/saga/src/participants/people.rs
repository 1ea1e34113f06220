//! In-memory People service.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::CorrelationId;
use domain::PersonPayload;
use tokio::sync::RwLock;

use super::Participant;
use crate::contracts::{Command, IdempotencyKey, PEOPLE_COMMANDS_TOPIC, ResponseEvent};

#[derive(Debug, Default)]
struct PeopleState {
    persons: HashMap<CorrelationId, PersonPayload>,
    replies: HashMap<IdempotencyKey, ResponseEvent>,
    applied: usize,
    fail_on_create: bool,
    fail_on_delete: bool,
    silent: bool,
}

/// In-memory People service for local runs and testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPeopleService {
    state: Arc<RwLock<PeopleState>>,
}

impl InMemoryPeopleService {
    /// Creates a new in-memory people service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to reject `CreatePersonRecord`.
    pub async fn set_fail_on_create(&self, fail: bool) {
        self.state.write().await.fail_on_create = fail;
    }

    /// Configures the service to reject `DeletePersonRecord`.
    pub async fn set_fail_on_delete(&self, fail: bool) {
        self.state.write().await.fail_on_delete = fail;
    }

    /// Configures the service to drop commands without answering.
    pub async fn set_silent(&self, silent: bool) {
        self.state.write().await.silent = silent;
    }

    /// Returns the number of person records.
    pub async fn person_count(&self) -> usize {
        self.state.read().await.persons.len()
    }

    /// Returns true if a person record exists for the saga.
    pub async fn has_person(&self, correlation_id: CorrelationId) -> bool {
        self.state.read().await.persons.contains_key(&correlation_id)
    }

    /// Returns how many commands actually changed state.
    pub async fn applied_count(&self) -> usize {
        self.state.read().await.applied
    }
}

#[async_trait]
impl Participant for InMemoryPeopleService {
    fn topic(&self) -> &'static str {
        PEOPLE_COMMANDS_TOPIC
    }

    async fn handle(&self, command: &Command) -> Option<ResponseEvent> {
        let mut state = self.state.write().await;
        if state.silent {
            return None;
        }
        if let Some(reply) = state.replies.get(command.idempotency_key()) {
            return Some(reply.clone());
        }

        let reply = match command {
            Command::CreatePersonRecord {
                correlation_id,
                person_payload,
                ..
            } => {
                if state.fail_on_create {
                    return Some(ResponseEvent::failed(command, "person record rejected"));
                }
                state.persons.insert(*correlation_id, person_payload.clone());
                ResponseEvent::succeeded(command)
            }
            Command::DeletePersonRecord { correlation_id, .. } => {
                if state.fail_on_delete {
                    return Some(ResponseEvent::failed(command, "people service unavailable"));
                }
                // Deleting a record that was never created still succeeds.
                state.persons.remove(correlation_id);
                ResponseEvent::succeeded(command)
            }
            other => {
                tracing::warn!(
                    command = other.command_type(),
                    "people service ignoring foreign command"
                );
                return None;
            }
        };

        state.applied += 1;
        state
            .replies
            .insert(command.idempotency_key().clone(), reply.clone());
        Some(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::Step;

    #[tokio::test]
    async fn test_create_and_delete() {
        let service = InMemoryPeopleService::new();
        let id = CorrelationId::new();
        let create = Command::create_person(id, PersonPayload::new("Ana"));

        let reply = service.handle(&create).await.unwrap();
        assert!(reply.failure_reason().is_none());
        assert!(service.has_person(id).await);

        let delete = Command::compensation_for(Step::People, id, create.idempotency_key());
        service.handle(&delete).await.unwrap();
        assert_eq!(service.person_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_command_applied_once() {
        let service = InMemoryPeopleService::new();
        let create = Command::create_person(CorrelationId::new(), PersonPayload::new("Ana"));

        let first = service.handle(&create).await.unwrap();
        let second = service.handle(&create).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(service.applied_count().await, 1);
        assert_eq!(service.person_count().await, 1);
    }

    #[tokio::test]
    async fn test_fail_on_create() {
        let service = InMemoryPeopleService::new();
        service.set_fail_on_create(true).await;

        let create = Command::create_person(CorrelationId::new(), PersonPayload::new("Ana"));
        let reply = service.handle(&create).await.unwrap();

        assert_eq!(reply.failure_reason(), Some("person record rejected"));
        assert_eq!(service.person_count().await, 0);
    }

    #[tokio::test]
    async fn test_silent() {
        let service = InMemoryPeopleService::new();
        service.set_silent(true).await;

        let create = Command::create_person(CorrelationId::new(), PersonPayload::new("Ana"));
        assert!(service.handle(&create).await.is_none());
    }
}
