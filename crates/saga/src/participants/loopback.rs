//! In-process bus wiring the orchestrator to simulated participants.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};

use super::Participant;
use crate::bus::{BusError, EventBus};
use crate::contracts::{OutboundMessage, ResponseEvent, WorkerEvent};

/// Bus that hands commands straight to in-process participants.
///
/// Participant responses are pushed onto an unbounded channel so the
/// orchestrator consumes them asynchronously, the same way it would read
/// them from a broker. Domain events are logged and kept for inspection.
#[derive(Clone)]
pub struct LoopbackBus {
    participants: Vec<Arc<dyn Participant>>,
    responses: mpsc::UnboundedSender<ResponseEvent>,
    events: Arc<RwLock<Vec<WorkerEvent>>>,
}

impl LoopbackBus {
    /// Creates a bus without participants, plus the receiving end of the
    /// response channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ResponseEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bus = Self {
            participants: Vec::new(),
            responses: tx,
            events: Arc::new(RwLock::new(Vec::new())),
        };
        (bus, rx)
    }

    /// Registers a participant for its topic.
    pub fn with_participant(mut self, participant: impl Participant + 'static) -> Self {
        self.participants.push(Arc::new(participant));
        self
    }

    /// Domain events published so far.
    pub async fn events(&self) -> Vec<WorkerEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl EventBus for LoopbackBus {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), BusError> {
        match message {
            OutboundMessage::Command(command) => {
                let topic = message.topic();
                let participant = self
                    .participants
                    .iter()
                    .find(|p| p.topic() == topic)
                    .ok_or_else(|| BusError::publish(message, "no consumer for topic"))?;

                if let Some(response) = participant.handle(command).await {
                    self.responses.send(response).map_err(|_| BusError::Closed)?;
                }
                Ok(())
            }
            OutboundMessage::Event(event) => {
                tracing::info!(
                    event_type = event.event_type(),
                    worker_request_id = %event.worker_request_id(),
                    "worker event published"
                );
                self.events.write().await.push(event.clone());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::Command;
    use crate::participants::{InMemoryPeopleService, InMemorySecurityService};
    use common::{CorrelationId, WorkerRequestId};
    use domain::{PersonPayload, SecurityPayload};

    #[tokio::test]
    async fn test_routes_commands_by_topic() {
        let people = InMemoryPeopleService::new();
        let security = InMemorySecurityService::new();
        let (bus, mut rx) = LoopbackBus::new();
        let bus = bus
            .with_participant(people.clone())
            .with_participant(security.clone());
        let id = CorrelationId::new();

        let create = Command::create_security_account(id, SecurityPayload::new("ana"));
        bus.publish(&OutboundMessage::Command(create.clone()))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), ResponseEvent::succeeded(&create));
        assert!(security.has_account("ana").await);
        assert_eq!(people.person_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_participant() {
        let (bus, _rx) = LoopbackBus::new();
        let create = Command::create_person(CorrelationId::new(), PersonPayload::new("Ana"));

        let err = bus
            .publish(&OutboundMessage::Command(create))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Publish { .. }));
    }

    #[tokio::test]
    async fn test_closed_channel() {
        let (bus, rx) = LoopbackBus::new();
        let bus = bus.with_participant(InMemoryPeopleService::new());
        drop(rx);

        let create = Command::create_person(CorrelationId::new(), PersonPayload::new("Ana"));
        let err = bus
            .publish(&OutboundMessage::Command(create))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Closed));
    }

    #[tokio::test]
    async fn test_records_events() {
        let (bus, _rx) = LoopbackBus::new();
        let event = WorkerEvent::WorkerProvisioned {
            worker_request_id: WorkerRequestId::from("W1"),
            correlation_id: CorrelationId::new(),
        };

        bus.publish(&OutboundMessage::Event(event.clone()))
            .await
            .unwrap();
        assert_eq!(bus.events().await, vec![event]);
    }
}
