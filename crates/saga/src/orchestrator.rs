//! Saga orchestrator for worker provisioning.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use common::CorrelationId;
use domain::WorkerProvisioningRequested;
use saga_store::{SagaStore, SagaStoreError, SagaStoreExt, Version};
use tokio::sync::mpsc;

use crate::bus::EventBus;
use crate::contracts::ResponseEvent;
use crate::error::{Result, SagaError};
use crate::instance::SagaInstance;
use crate::policy::RetryPolicy;
use crate::state::SagaState;

/// Reloads after a lost compare-and-swap before giving up with `Contention`.
const MAX_WRITE_ATTEMPTS: usize = 5;

/// What a recovery sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Outbox messages published again.
    pub republished: usize,
    /// Sagas whose expired deadline was handled.
    pub timed_out: usize,
}

/// Drives worker-provisioning sagas.
///
/// The orchestrator is the only writer of saga instances. Every input
/// (request, response, expired deadline, abort) goes through the same cycle:
/// load the instance, apply a pure transition, write it back with a
/// compare-and-swap on its version, then publish the outbox. A lost swap
/// means another worker moved the saga first; the input is re-applied to the
/// fresh instance, where duplicates show up as stale.
///
/// Because the write happens before anything is published, a crash leaves at
/// worst unpublished messages behind, which [`relay_outbox`] picks up.
///
/// [`relay_outbox`]: SagaOrchestrator::relay_outbox
pub struct SagaOrchestrator<S, B>
where
    S: SagaStore,
    B: EventBus,
{
    store: S,
    bus: B,
    policy: RetryPolicy,
}

impl<S, B> SagaOrchestrator<S, B>
where
    S: SagaStore,
    B: EventBus,
{
    /// Creates an orchestrator with the default retry policy.
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            policy: RetryPolicy::default(),
        }
    }

    /// Replaces the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the underlying bus.
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Returns the retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Starts a saga for a provisioning request under a fresh correlation ID.
    pub async fn start(&self, request: WorkerProvisioningRequested) -> Result<CorrelationId> {
        self.start_with_id(CorrelationId::new(), request).await
    }

    /// Starts a saga under a caller-chosen correlation ID.
    ///
    /// Fails with `DuplicateSaga` if the ID was ever used, including by a
    /// finished or archived saga. The instance and its first command are
    /// stored in one write; a failing publish is left to the relay.
    #[tracing::instrument(
        skip_all,
        fields(
            correlation_id = %correlation_id,
            worker_request_id = %request.worker_request_id
        )
    )]
    pub async fn start_with_id(
        &self,
        correlation_id: CorrelationId,
        request: WorkerProvisioningRequested,
    ) -> Result<CorrelationId> {
        request.validate()?;

        if self.store.exists(correlation_id).await? {
            return Err(SagaError::DuplicateSaga(correlation_id));
        }

        let mut saga = SagaInstance::initiate(correlation_id, request, Utc::now(), &self.policy);
        match self.save(&mut saga, Version::initial()).await {
            Ok(()) => {}
            Err(SagaError::Store(
                SagaStoreError::ConcurrencyConflict { .. } | SagaStoreError::Archived(_),
            )) => return Err(SagaError::DuplicateSaga(correlation_id)),
            Err(e) => return Err(e),
        }

        metrics::counter!("saga_started_total").increment(1);
        tracing::info!("saga started");

        self.flush_outbox(saga).await;
        Ok(correlation_id)
    }

    /// Applies a participant response and returns the updated instance.
    ///
    /// Responses for unknown sagas or with an idempotency key the saga is not
    /// waiting on fail with `UnknownSaga` / `StaleResponse` and change
    /// nothing.
    #[tracing::instrument(
        skip_all,
        fields(
            correlation_id = %response.correlation_id(),
            idempotency_key = %response.idempotency_key()
        )
    )]
    pub async fn on_response(&self, response: ResponseEvent) -> Result<SagaInstance> {
        let result = self
            .transition(response.correlation_id(), |saga| {
                saga.apply_response(&response, Utc::now(), &self.policy)?;
                Ok(true)
            })
            .await
            .map(|(saga, _)| saga);

        if let Err(SagaError::StaleResponse { .. }) = &result {
            metrics::counter!("saga_stale_responses_total").increment(1);
        }
        result
    }

    /// Applies a response the way a message consumer should: stale and
    /// unknown responses are logged and dropped.
    pub async fn handle_response(&self, response: ResponseEvent) -> Result<()> {
        match self.on_response(response).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_ignorable() => {
                tracing::warn!(error = %e, "response ignored");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Consumes responses until the channel closes.
    ///
    /// A response that cannot be applied is dropped; the saga's deadline
    /// makes the command be sent again.
    pub async fn consume_responses(&self, mut responses: mpsc::UnboundedReceiver<ResponseEvent>) {
        while let Some(response) = responses.recv().await {
            if let Err(e) = self.handle_response(response).await {
                tracing::error!(error = %e, "failed to apply response");
            }
        }
        tracing::info!("response channel closed");
    }

    /// Operator abort: fails the outstanding forward step and compensates.
    ///
    /// A saga that is already compensating is returned unchanged; a finished
    /// one is rejected with `AlreadyTerminal`.
    #[tracing::instrument(skip_all, fields(correlation_id = %correlation_id))]
    pub async fn abort(&self, correlation_id: CorrelationId) -> Result<SagaInstance> {
        let result = self
            .transition(correlation_id, |saga| {
                saga.apply_abort(Utc::now(), &self.policy)
            })
            .await
            .map(|(saga, _)| saga);

        match result {
            Ok(saga) => {
                tracing::info!(state = %saga.state(), "abort requested");
                Ok(saga)
            }
            Err(SagaError::UnknownSaga(_)) => match self.store.get_archived(correlation_id).await? {
                Some(record) => Err(SagaError::AlreadyTerminal {
                    correlation_id,
                    state: SagaInstance::from_record(&record)?.state(),
                }),
                None => Err(SagaError::UnknownSaga(correlation_id)),
            },
            Err(e) => Err(e),
        }
    }

    /// Returns the current snapshot of a saga, archived or not.
    pub async fn inspect(&self, correlation_id: CorrelationId) -> Result<SagaInstance> {
        let record = self
            .store
            .find(correlation_id)
            .await?
            .ok_or(SagaError::UnknownSaga(correlation_id))?;
        Ok(SagaInstance::from_record(&record)?)
    }

    /// Lists non-terminal sagas that have not changed for `older_than`.
    pub async fn list_stuck(&self, older_than: Duration) -> Result<Vec<SagaInstance>> {
        self.list_stuck_at(Utc::now(), older_than).await
    }

    /// Like [`list_stuck`](Self::list_stuck) with an explicit clock.
    pub async fn list_stuck_at(
        &self,
        now: DateTime<Utc>,
        older_than: Duration,
    ) -> Result<Vec<SagaInstance>> {
        let cutoff = cutoff(now, older_than);
        let states: Vec<&str> = SagaState::ALL
            .iter()
            .filter(|s| !s.is_terminal())
            .map(|s| s.as_str())
            .collect();

        self.store
            .list_by_states(&states)
            .await?
            .iter()
            .filter(|r| r.updated_at <= cutoff)
            .map(|r| SagaInstance::from_record(r).map_err(SagaError::from))
            .collect()
    }

    /// Handles every outstanding command whose deadline has passed.
    pub async fn process_timeouts(&self) -> Result<usize> {
        self.process_timeouts_at(Utc::now()).await
    }

    /// Like [`process_timeouts`](Self::process_timeouts) with an explicit
    /// clock. Returns the number of sagas handled.
    pub async fn process_timeouts_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let states = SagaState::AWAITING.map(|s| s.as_str());
        let due: Vec<CorrelationId> = self
            .store
            .list_by_states(&states)
            .await?
            .into_iter()
            .filter(|r| r.next_deadline.is_some_and(|deadline| deadline <= now))
            .map(|r| r.correlation_id)
            .collect();

        let mut handled = 0;
        for correlation_id in due {
            let result = self
                .transition(correlation_id, |saga| {
                    Ok(saga.apply_timeout(now, &self.policy))
                })
                .await;
            match result {
                Ok((_, true)) => handled += 1,
                // Another worker already moved the deadline.
                Ok((_, false)) => {}
                Err(e) => {
                    tracing::error!(%correlation_id, error = %e, "timeout handling failed")
                }
            }
        }
        Ok(handled)
    }

    /// Publishes messages left in outboxes by failed publishes or crashes.
    /// Returns how many messages the bus accepted.
    pub async fn relay_outbox(&self) -> Result<usize> {
        let mut relayed = 0;
        for record in self.store.list_with_pending_outbox().await? {
            let saga = match SagaInstance::from_record(&record) {
                Ok(saga) => saga,
                Err(e) => {
                    tracing::error!(
                        correlation_id = %record.correlation_id,
                        error = %e,
                        "undecodable saga record"
                    );
                    continue;
                }
            };
            let before = saga.outbox().len();
            let saga = self.flush_outbox(saga).await;
            relayed += before - saga.outbox().len();
        }
        Ok(relayed)
    }

    /// Moves terminal sagas older than `retention` to the archive.
    pub async fn archive_terminal(&self, retention: Duration) -> Result<usize> {
        self.archive_terminal_at(Utc::now(), retention).await
    }

    /// Like [`archive_terminal`](Self::archive_terminal) with an explicit
    /// clock. Sagas with unpublished messages stay hot until relayed.
    pub async fn archive_terminal_at(
        &self,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<usize> {
        let cutoff = cutoff(now, retention);
        let records = self
            .store
            .list_by_states(&[SagaState::Completed.as_str(), SagaState::Compensated.as_str()])
            .await?;

        let mut archived = 0;
        for record in records
            .iter()
            .filter(|r| !r.outbox_pending && r.updated_at <= cutoff)
        {
            match self.store.archive(record.correlation_id).await {
                Ok(()) => archived += 1,
                Err(e) => tracing::warn!(
                    correlation_id = %record.correlation_id,
                    error = %e,
                    "archive failed"
                ),
            }
        }
        if archived > 0 {
            tracing::info!(archived, "archived terminal sagas");
        }
        Ok(archived)
    }

    /// Startup sweep: relays unpublished messages, then handles deadlines
    /// that expired while the process was down.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let report = RecoveryReport {
            republished: self.relay_outbox().await?,
            timed_out: self.process_timeouts().await?,
        };
        tracing::info!(
            republished = report.republished,
            timed_out = report.timed_out,
            "recovery sweep finished"
        );
        Ok(report)
    }

    /// Runs `apply` against the latest instance and persists the result.
    ///
    /// `apply` returns `false` when there is nothing to write; the flag is
    /// passed back alongside the instance.
    async fn transition<F>(
        &self,
        correlation_id: CorrelationId,
        apply: F,
    ) -> Result<(SagaInstance, bool)>
    where
        F: Fn(&mut SagaInstance) -> Result<bool> + Send + Sync,
    {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut saga = self.load(correlation_id).await?;
            let expected = saga.version();
            let from = saga.state();

            if !apply(&mut saga)? {
                return Ok((saga, false));
            }

            match self.save(&mut saga, expected).await {
                Ok(()) => {
                    self.observe(from, &saga);
                    return Ok((self.flush_outbox(saga).await, true));
                }
                Err(SagaError::Store(SagaStoreError::ConcurrencyConflict { .. })) => {
                    tracing::debug!(%correlation_id, "lost write race, reloading");
                }
                Err(e) => return Err(e),
            }
        }
        Err(SagaError::Contention(correlation_id))
    }

    /// Publishes the outbox in order, stopping at the first failure, and
    /// clears what was accepted.
    async fn flush_outbox(&self, mut saga: SagaInstance) -> SagaInstance {
        let mut published = 0;
        for message in saga.outbox() {
            match self.bus.publish(message).await {
                Ok(()) => published += 1,
                Err(e) => {
                    metrics::counter!("saga_outbox_publish_failures_total").increment(1);
                    tracing::warn!(
                        correlation_id = %saga.correlation_id(),
                        error = %e,
                        "publish failed, message kept in outbox"
                    );
                    break;
                }
            }
        }
        if published == 0 {
            return saga;
        }

        let expected = saga.version();
        saga.mark_published(published);
        if let Err(e) = self.save(&mut saga, expected).await {
            // The messages stay in the stored outbox and are relayed again.
            tracing::debug!(
                correlation_id = %saga.correlation_id(),
                error = %e,
                "outbox not cleared"
            );
        }
        saga
    }

    async fn load(&self, correlation_id: CorrelationId) -> Result<SagaInstance> {
        let record = self
            .store
            .get(correlation_id)
            .await?
            .ok_or(SagaError::UnknownSaga(correlation_id))?;
        Ok(SagaInstance::from_record(&record)?)
    }

    async fn save(&self, saga: &mut SagaInstance, expected: Version) -> Result<()> {
        let record = saga.to_record()?;
        saga.version = self.store.put(record, expected).await?;
        Ok(())
    }

    fn observe(&self, from: SagaState, saga: &SagaInstance) {
        let state = saga.state();
        if from == state || !state.is_terminal() {
            return;
        }

        let duration = (saga.updated_at() - saga.created_at())
            .to_std()
            .unwrap_or_default()
            .as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(duration);

        if state == SagaState::Completed {
            metrics::counter!("saga_completed_total").increment(1);
            tracing::info!(correlation_id = %saga.correlation_id(), duration, "saga completed");
        } else {
            metrics::counter!("saga_compensated_total").increment(1);
            tracing::warn!(
                correlation_id = %saga.correlation_id(),
                reason = %saga.failure().map(ToString::to_string).unwrap_or_default(),
                compensation_incomplete = saga.compensation_incomplete(),
                duration,
                "saga compensated"
            );
        }
    }
}

fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
