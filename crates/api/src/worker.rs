//! Background tasks: response consumer and periodic sweeper.

use std::sync::Arc;
use std::time::{Duration, Instant};

use saga::ResponseEvent;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::Orchestrator;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub relayed: usize,
    pub timed_out: usize,
    pub archived: usize,
}

/// Feeds participant responses to the orchestrator until the channel closes.
pub fn spawn_response_consumer(
    orchestrator: Arc<Orchestrator>,
    responses: mpsc::UnboundedReceiver<ResponseEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move { orchestrator.consume_responses(responses).await })
}

/// Runs [`sweep_once`] every `interval` until `shutdown` flips to true.
pub fn spawn_sweeper(
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    retention: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep_once(&orchestrator, retention).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("sweeper stopped");
    })
}

/// Relays unpublished outbox messages, handles expired deadlines and
/// archives finished sagas past `retention`. Failures are logged; the next
/// sweep tries again.
pub async fn sweep_once(orchestrator: &Orchestrator, retention: Duration) -> SweepReport {
    let started = Instant::now();
    let mut report = SweepReport::default();

    match orchestrator.relay_outbox().await {
        Ok(n) => report.relayed = n,
        Err(e) => tracing::error!(error = %e, "outbox relay failed"),
    }
    match orchestrator.process_timeouts().await {
        Ok(n) => report.timed_out = n,
        Err(e) => tracing::error!(error = %e, "timeout processing failed"),
    }
    match orchestrator.archive_terminal(retention).await {
        Ok(n) => report.archived = n,
        Err(e) => tracing::error!(error = %e, "archival failed"),
    }

    metrics::histogram!("saga_sweep_duration_seconds").record(started.elapsed().as_secs_f64());
    if report != SweepReport::default() {
        tracing::debug!(
            relayed = report.relayed,
            timed_out = report.timed_out,
            archived = report.archived,
            "sweep finished"
        );
    }
    report
}
