use crate::handler::TaskHandlerRegistry;
use crate::metrics::WorkerMetrics;
use crate::queue::{Delivery, QueueError};
use std::sync::Arc;
use std::time::Instant;
use task_worker_core::{TaskId, TaskMessage, TaskOutcome};
use task_worker_persistence::ResultStore;
use tracing::{error, info, warn};

const UNKNOWN_TYPE_LABEL: &str = "unknown";

/// Where a message ended up.
///
/// A message moves `Received → Handled → Persisted → Acknowledged`, or
/// `Received → Handled → PersistFailed → Requeued`. Messages that cannot be
/// decoded, or whose handler panics, go `Received → Rejected → Requeued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Rejected,
    Persisted,
    PersistFailed,
    Acknowledged,
    Requeued,
}

/// Settlement owed to the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Ack => "ack",
            Disposition::Requeue => "requeue",
        }
    }
}

/// Outcome of processing one message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// `None` when the body could not be decoded
    pub task_id: Option<TaskId>,
    /// Built-in type name, or `unknown`
    pub label: &'static str,
    pub state: DispatchState,
}

impl DispatchReport {
    /// Only a persisted result is acknowledged
    pub fn disposition(&self) -> Disposition {
        match self.state {
            DispatchState::Persisted | DispatchState::Acknowledged => Disposition::Ack,
            _ => Disposition::Requeue,
        }
    }
}

/// Routes a message to its handler and persists the result
pub struct Dispatcher {
    registry: Arc<TaskHandlerRegistry>,
    store: Arc<dyn ResultStore>,
    metrics: Arc<WorkerMetrics>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<TaskHandlerRegistry>,
        store: Arc<dyn ResultStore>,
        metrics: Arc<WorkerMetrics>,
    ) -> Self {
        Dispatcher {
            registry,
            store,
            metrics,
        }
    }

    /// Process one delivery end to end and settle it with the broker.
    ///
    /// An `Err` means the settlement itself failed; the channel should be
    /// treated as lost.
    pub async fn handle_delivery(&self, delivery: Box<dyn Delivery>) -> Result<DispatchState, QueueError> {
        let report = self.dispatch(delivery.body()).await;
        let disposition = report.disposition();

        let settled = match disposition {
            Disposition::Ack => {
                delivery.ack().await?;
                DispatchState::Acknowledged
            }
            Disposition::Requeue => {
                delivery.requeue().await?;
                DispatchState::Requeued
            }
        };

        self.metrics.inc_messages(report.label, disposition);
        Ok(settled)
    }

    /// Decode, run and persist a message body without settling it
    pub async fn dispatch(&self, body: &[u8]) -> DispatchReport {
        info!("Received task: {}", String::from_utf8_lossy(body));

        let message = match TaskMessage::from_bytes(body) {
            Ok(message) => message,
            Err(e) => {
                error!("Rejecting message: {}", e);
                return DispatchReport {
                    task_id: None,
                    label: UNKNOWN_TYPE_LABEL,
                    state: DispatchState::Rejected,
                };
            }
        };

        let label = message
            .known_type()
            .map_or(UNKNOWN_TYPE_LABEL, |task_type| task_type.as_str());
        info!(task_id = %message.task_id, task_type = ?message.tag(), "Processing task");

        let state = match self.run_handler(&message, label).await {
            Some(outcome) => self.persist(&message.task_id, &outcome).await,
            None => DispatchState::Rejected,
        };

        DispatchReport {
            task_id: Some(message.task_id),
            label,
            state,
        }
    }

    /// Run the handler in its own task so a panic cannot take the loop down.
    /// Returns `None` if the handler did not finish.
    async fn run_handler(&self, message: &TaskMessage, label: &str) -> Option<TaskOutcome> {
        let Some(handler) = message.tag().and_then(|tag| self.registry.resolve(tag)) else {
            warn!("No handler registered for task type: {:?}", message.tag());
            return Some(TaskOutcome::completed(None));
        };

        let payload = message.task_data.clone();
        let started = Instant::now();
        let joined = tokio::spawn(async move { handler.execute(&payload).await }).await;
        self.metrics
            .observe_handler_duration(label, started.elapsed().as_secs_f64());

        match joined {
            Ok(result) => Some(TaskOutcome::completed(Some(result))),
            Err(e) if e.is_panic() => {
                error!("Handler for task {} panicked", message.task_id);
                None
            }
            Err(_) => {
                error!("Handler for task {} was cancelled", message.task_id);
                None
            }
        }
    }

    async fn persist(&self, task_id: &TaskId, outcome: &TaskOutcome) -> DispatchState {
        let result_len = outcome.result.as_ref().map_or(0, |r| r.len());
        info!(
            "Updating DB for task_id={} with status='{}' and result length={}",
            task_id,
            outcome.status.as_str(),
            result_len
        );

        match self.store.persist(task_id, outcome).await {
            Ok(persisted) => {
                info!(rows_affected = persisted.rows_affected, "Task completed: {}", task_id);
                DispatchState::Persisted
            }
            Err(e) => {
                error!("DB update error for task_id={}: {}", task_id, e);
                self.metrics.persist_failures.inc();
                DispatchState::PersistFailed
            }
        }
    }
}
