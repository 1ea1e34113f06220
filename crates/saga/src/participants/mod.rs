//! Participant services and in-memory simulations of them.
//!
//! The real People and Security services live outside this system; the
//! in-memory versions here honour the same contract (idempotent by key,
//! answer with `StepSucceeded`/`StepFailed`) and back local runs and tests.

pub mod loopback;
pub mod people;
pub mod security;

use async_trait::async_trait;

use crate::contracts::{Command, ResponseEvent};

pub use loopback::LoopbackBus;
pub use people::InMemoryPeopleService;
pub use security::InMemorySecurityService;

/// A service that consumes saga commands from one topic.
#[async_trait]
pub trait Participant: Send + Sync {
    /// The command topic this participant consumes.
    fn topic(&self) -> &'static str;

    /// Applies a command and returns the response to send back.
    ///
    /// `None` means the participant stays silent, which the orchestrator
    /// observes as a timeout.
    async fn handle(&self, command: &Command) -> Option<ResponseEvent>;
}
