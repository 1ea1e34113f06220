//! Message bus abstraction for outbound commands and events.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::contracts::{Command, OutboundMessage, WorkerEvent};

/// Errors raised by a bus implementation.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Publish of {message_type} to {topic} failed: {reason}")]
    Publish {
        topic: &'static str,
        message_type: &'static str,
        reason: String,
    },

    #[error("Bus is closed")]
    Closed,
}

impl BusError {
    /// Builds a publish error for `message`.
    pub fn publish(message: &OutboundMessage, reason: impl Into<String>) -> Self {
        BusError::Publish {
            topic: message.topic(),
            message_type: message.message_type(),
            reason: reason.into(),
        }
    }
}

/// Publishes saga messages to participants and downstream consumers.
///
/// Delivery is at-least-once: the orchestrator re-publishes anything it
/// cannot confirm, so implementations need not deduplicate.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes one message to its topic.
    async fn publish(&self, message: &OutboundMessage) -> Result<(), BusError>;
}

#[async_trait]
impl<T: EventBus + ?Sized> EventBus for Arc<T> {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), BusError> {
        (**self).publish(message).await
    }
}

#[derive(Debug, Default)]
struct Recorded {
    published: Vec<OutboundMessage>,
    fail_on_publish: bool,
}

/// Bus that records every accepted message. Intended for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventBus {
    inner: Arc<RwLock<Recorded>>,
}

impl InMemoryEventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following publish fail until reset.
    pub async fn set_fail_on_publish(&self, fail: bool) {
        self.inner.write().await.fail_on_publish = fail;
    }

    /// All accepted messages in publish order.
    pub async fn published(&self) -> Vec<OutboundMessage> {
        self.inner.read().await.published.clone()
    }

    /// Accepted commands in publish order.
    pub async fn commands(&self) -> Vec<Command> {
        self.inner
            .read()
            .await
            .published
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::Command(c) => Some(c.clone()),
                OutboundMessage::Event(_) => None,
            })
            .collect()
    }

    /// Accepted domain events in publish order.
    pub async fn events(&self) -> Vec<WorkerEvent> {
        self.inner
            .read()
            .await
            .published
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::Event(e) => Some(e.clone()),
                OutboundMessage::Command(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), BusError> {
        let mut inner = self.inner.write().await;
        if inner.fail_on_publish {
            return Err(BusError::publish(message, "bus unavailable"));
        }
        inner.published.push(message.clone());
        Ok(())
    }
}
