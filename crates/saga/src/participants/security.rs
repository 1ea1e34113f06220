//! In-memory Security service.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::CorrelationId;
use tokio::sync::RwLock;

use super::Participant;
use crate::contracts::{Command, IdempotencyKey, ResponseEvent, SECURITY_COMMANDS_TOPIC};

#[derive(Debug, Default)]
struct SecurityState {
    /// Username to owning saga; `None` for accounts created outside any saga.
    accounts: HashMap<String, Option<CorrelationId>>,
    replies: HashMap<IdempotencyKey, ResponseEvent>,
    applied: usize,
    fail_on_delete: bool,
    silent: bool,
}

/// In-memory Security service for local runs and testing.
///
/// Usernames are unique; creating an account for a taken username is
/// rejected with "duplicate username".
#[derive(Debug, Clone, Default)]
pub struct InMemorySecurityService {
    state: Arc<RwLock<SecurityState>>,
}

impl InMemorySecurityService {
    /// Creates a new in-memory security service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an account that exists independently of any saga.
    pub async fn register_username(&self, username: impl Into<String>) {
        self.state.write().await.accounts.insert(username.into(), None);
    }

    /// Configures the service to reject `DeleteSecurityAccount`.
    pub async fn set_fail_on_delete(&self, fail: bool) {
        self.state.write().await.fail_on_delete = fail;
    }

    /// Configures the service to drop commands without answering.
    pub async fn set_silent(&self, silent: bool) {
        self.state.write().await.silent = silent;
    }

    /// Returns the number of accounts.
    pub async fn account_count(&self) -> usize {
        self.state.read().await.accounts.len()
    }

    /// Returns true if an account exists for the username.
    pub async fn has_account(&self, username: &str) -> bool {
        self.state.read().await.accounts.contains_key(username)
    }

    /// Returns how many commands actually changed state.
    pub async fn applied_count(&self) -> usize {
        self.state.read().await.applied
    }
}

#[async_trait]
impl Participant for InMemorySecurityService {
    fn topic(&self) -> &'static str {
        SECURITY_COMMANDS_TOPIC
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
            Command::CreateSecurityAccount {
                correlation_id,
                security_payload,
                ..
            } => {
                if state.accounts.contains_key(&security_payload.username) {
                    return Some(ResponseEvent::failed(command, "duplicate username"));
                }
                state
                    .accounts
                    .insert(security_payload.username.clone(), Some(*correlation_id));
                ResponseEvent::succeeded(command)
            }
            Command::DeleteSecurityAccount { correlation_id, .. } => {
                if state.fail_on_delete {
                    return Some(ResponseEvent::failed(
                        command,
                        "security service unavailable",
                    ));
                }
                state
                    .accounts
                    .retain(|_, owner| *owner != Some(*correlation_id));
                ResponseEvent::succeeded(command)
            }
            other => {
                tracing::warn!(
                    command = other.command_type(),
                    "security service ignoring foreign command"
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
