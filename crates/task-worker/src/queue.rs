//! Minimal contract the worker needs from a message broker.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Broker connection failed: {0}")]
    Connection(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Consumer stream closed by broker")]
    ConsumerClosed,

    #[error("Failed to settle delivery: {0}")]
    Settle(String),
}

/// A received message awaiting settlement.
///
/// Settling consumes the delivery, so a message is acknowledged or
/// requeued exactly once.
#[async_trait]
pub trait Delivery: Send {
    fn body(&self) -> &[u8];

    /// Remove the message from the queue
    async fn ack(self: Box<Self>) -> Result<(), QueueError>;

    /// Return the message to the queue for redelivery
    async fn requeue(self: Box<Self>) -> Result<(), QueueError>;
}

/// An open consuming session on the work queue
#[async_trait]
pub trait QueueConsumer: Send {
    /// Next delivery, or `None` once the broker has closed the stream
    async fn next_delivery(&mut self) -> Option<Result<Box<dyn Delivery>, QueueError>>;

    /// Close the session
    async fn close(self: Box<Self>);
}

/// Opens consuming sessions.
///
/// A successful `connect` has declared the queue and applied the prefetch
/// limit.
#[async_trait]
pub trait QueueConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn QueueConsumer>, QueueError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted broker for dispatcher and consumer loop tests.

    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Settlement {
        Ack(Vec<u8>),
        Requeue(Vec<u8>),
    }

    pub type SettlementLog = Arc<Mutex<Vec<Settlement>>>;

    pub struct MockDelivery {
        body: Vec<u8>,
        log: SettlementLog,
    }

    impl MockDelivery {
        pub fn new(body: Vec<u8>, log: SettlementLog) -> Box<Self> {
            Box::new(MockDelivery { body, log })
        }
    }

    #[async_trait]
    impl Delivery for MockDelivery {
        fn body(&self) -> &[u8] {
            &self.body
        }

        async fn ack(self: Box<Self>) -> Result<(), QueueError> {
            let MockDelivery { body, log } = *self;
            log.lock().push(Settlement::Ack(body));
            Ok(())
        }

        async fn requeue(self: Box<Self>) -> Result<(), QueueError> {
            let MockDelivery { body, log } = *self;
            log.lock().push(Settlement::Requeue(body));
            Ok(())
        }
    }

    /// Connector that fails a set number of times, then serves one session
    /// per script entry. Every session but the last ends with the broker
    /// closing the stream; the last one requests shutdown once drained.
    pub struct ScriptedConnector {
        failures_left: AtomicUsize,
        attempts: AtomicUsize,
        sessions: Mutex<VecDeque<Vec<Vec<u8>>>>,
        pub log: SettlementLog,
        shutdown: CancellationToken,
    }

    impl ScriptedConnector {
        pub fn new(failures: usize, sessions: Vec<Vec<Vec<u8>>>, shutdown: CancellationToken) -> Self {
            ScriptedConnector {
                failures_left: AtomicUsize::new(failures),
                attempts: AtomicUsize::new(0),
                sessions: Mutex::new(sessions.into()),
                log: SettlementLog::default(),
                shutdown,
            }
        }

        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QueueConnector for ScriptedConnector {
        async fn connect(&self) -> Result<Box<dyn QueueConsumer>, QueueError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);

            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(QueueError::Connection("connection refused".to_string()));
            }

            let mut sessions = self.sessions.lock();
            let bodies = sessions.pop_front().unwrap_or_default();
            Ok(Box::new(ScriptedConsumer {
                bodies: bodies.into(),
                last: sessions.is_empty(),
                log: self.log.clone(),
                shutdown: self.shutdown.clone(),
            }))
        }
    }

    struct ScriptedConsumer {
        bodies: VecDeque<Vec<u8>>,
        last: bool,
        log: SettlementLog,
        shutdown: CancellationToken,
    }

    #[async_trait]
    impl QueueConsumer for ScriptedConsumer {
        async fn next_delivery(&mut self) -> Option<Result<Box<dyn Delivery>, QueueError>> {
            if let Some(body) = self.bodies.pop_front() {
                let delivery: Box<dyn Delivery> = MockDelivery::new(body, self.log.clone());
                return Some(Ok(delivery));
            }
            if !self.last {
                return None;
            }
            self.shutdown.cancel();
            std::future::pending().await
        }

        async fn close(self: Box<Self>) {}
    }
}
