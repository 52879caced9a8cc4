use crate::dispatcher::{DispatchState, Dispatcher};
use crate::metrics::WorkerMetrics;
use crate::queue::{QueueConnector, QueueConsumer, QueueError};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Connection lifecycle of the consumer loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Consuming,
}

enum SessionEnd {
    Shutdown,
    Lost(QueueError),
}

/// Keeps a consuming session open and feeds deliveries to the dispatcher
/// one at a time.
pub struct ConsumerLoop {
    connector: Arc<dyn QueueConnector>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<WorkerMetrics>,
    reconnect_delay: Duration,
    state: Arc<RwLock<ConnectionState>>,
    shutdown: CancellationToken,
}

impl ConsumerLoop {
    pub fn new(
        connector: Arc<dyn QueueConnector>,
        dispatcher: Arc<Dispatcher>,
        metrics: Arc<WorkerMetrics>,
        reconnect_delay: Duration,
    ) -> Self {
        ConsumerLoop {
            connector,
            dispatcher,
            metrics,
            reconnect_delay,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Use an externally owned shutdown token
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop after the in-flight message, if any, has been settled
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    /// Run until shutdown is requested. Broker failures never end the loop.
    pub async fn run(&self) {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            let connected = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                connected = self.connector.connect() => connected,
            };

            let consumer = match connected {
                Ok(consumer) => consumer,
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    self.metrics.broker_connect_failures.inc();
                    warn!(
                        "{}. Retrying in {} seconds...",
                        e,
                        self.reconnect_delay.as_secs()
                    );
                    if !self.pause().await {
                        break;
                    }
                    continue;
                }
            };

            self.set_state(ConnectionState::Consuming);
            let ended = self.consume(consumer).await;
            self.set_state(ConnectionState::Disconnected);

            match ended {
                SessionEnd::Shutdown => break,
                SessionEnd::Lost(e) => {
                    error!(
                        "Connection lost: {}. Reconnecting in {} seconds...",
                        e,
                        self.reconnect_delay.as_secs()
                    );
                    if !self.pause().await {
                        break;
                    }
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!("Worker stopped");
    }

    /// Sleep out the reconnect delay; `false` if shutdown came first
    async fn pause(&self) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.reconnect_delay) => true,
        }
    }

    async fn consume(&self, mut consumer: Box<dyn QueueConsumer>) -> SessionEnd {
        let ended = loop {
            // Shutdown is only observed between messages
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break SessionEnd::Shutdown,
                next = consumer.next_delivery() => next,
            };

            match next {
                Some(Ok(delivery)) => match self.dispatcher.handle_delivery(delivery).await {
                    Ok(DispatchState::Requeued) => debug!("Message returned to the queue"),
                    Ok(_) => {}
                    Err(e) => break SessionEnd::Lost(e),
                },
                Some(Err(e)) => break SessionEnd::Lost(e),
                None => break SessionEnd::Lost(QueueError::ConsumerClosed),
            }
        };

        if matches!(ended, SessionEnd::Shutdown) {
            info!("Shutdown requested, closing broker connection");
        }
        consumer.close().await;
        ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{TaskHandler, TaskHandlerRegistry, TaskResult};
    use crate::queue::testing::{ScriptedConnector, Settlement};
    use async_trait::async_trait;
    use task_worker_core::{TaskId, TaskPayload};
    use task_worker_persistence::InMemoryResultStore;

    struct UpperHandler;

    #[async_trait]
    impl TaskHandler for UpperHandler {
        async fn execute(&self, payload: &TaskPayload) -> TaskResult {
            payload.text().to_uppercase()
        }
    }

    fn consumer_loop(
        connector: Arc<ScriptedConnector>,
        shutdown: CancellationToken,
    ) -> (ConsumerLoop, Arc<InMemoryResultStore>) {
        let mut registry = TaskHandlerRegistry::new();
        registry.register("http_get", UpperHandler);

        let store = Arc::new(InMemoryResultStore::new());
        store.insert_pending(TaskId::Int(1));
        store.insert_pending(TaskId::Int(2));

        let metrics = Arc::new(WorkerMetrics::new().unwrap());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(registry),
            store.clone(),
            metrics.clone(),
        ));

        let consumer = ConsumerLoop::new(connector, dispatcher, metrics, Duration::from_secs(5))
            .with_shutdown(shutdown);
        (consumer, store)
    }

    fn message(task_id: i64) -> Vec<u8> {
        format!(
            r#"{{"task_id": {}, "task_type": "http_get", "task_data": "hello"}}"#,
            task_id
        )
        .into_bytes()
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_broker_is_reachable() {
        let shutdown = CancellationToken::new();
        let connector = Arc::new(ScriptedConnector::new(
            3,
            vec![vec![message(1)]],
            shutdown.clone(),
        ));
        let (consumer, store) = consumer_loop(connector.clone(), shutdown);

        let started = tokio::time::Instant::now();
        consumer.run().await;

        assert_eq!(connector.attempts(), 4);
        assert!(started.elapsed() >= Duration::from_secs(15));
        assert_eq!(consumer.metrics.broker_connect_failures.get(), 3);
        assert_eq!(*connector.log.lock(), vec![Settlement::Ack(message(1))]);
        assert_eq!(store.get(&TaskId::Int(1)).unwrap().result.as_deref(), Some("HELLO"));
        assert_eq!(consumer.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_stream_closes() {
        let shutdown = CancellationToken::new();
        let connector = Arc::new(ScriptedConnector::new(
            0,
            vec![vec![message(1)], vec![message(2)]],
            shutdown.clone(),
        ));
        let (consumer, store) = consumer_loop(connector.clone(), shutdown);

        consumer.run().await;

        assert_eq!(connector.attempts(), 2);
        assert_eq!(
            *connector.log.lock(),
            vec![Settlement::Ack(message(1)), Settlement::Ack(message(2))]
        );
        assert_eq!(store.get(&TaskId::Int(2)).unwrap().status, "completed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_message_does_not_end_session() {
        let shutdown = CancellationToken::new();
        let connector = Arc::new(ScriptedConnector::new(
            0,
            vec![vec![message(1), b"not json".to_vec(), message(2)]],
            shutdown.clone(),
        ));
        let (consumer, store) = consumer_loop(connector.clone(), shutdown);

        consumer.run().await;

        assert_eq!(
            *connector.log.lock(),
            vec![
                Settlement::Ack(message(1)),
                Settlement::Requeue(b"not json".to_vec()),
                Settlement::Ack(message(2)),
            ]
        );
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let shutdown = CancellationToken::new();
        let connector = Arc::new(ScriptedConnector::new(0, vec![], shutdown.clone()));
        let (consumer, _store) = consumer_loop(connector.clone(), shutdown);

        consumer.shutdown();
        consumer.run().await;

        assert_eq!(connector.attempts(), 0);
        assert!(consumer.shutdown_token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_backoff() {
        let shutdown = CancellationToken::new();
        let connector = Arc::new(ScriptedConnector::new(usize::MAX, vec![], shutdown.clone()));
        let (consumer, _store) = consumer_loop(connector.clone(), shutdown.clone());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            shutdown.cancel();
        });
        consumer.run().await;

        assert_eq!(connector.attempts(), 3);
    }
}
