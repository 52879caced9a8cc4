//! RabbitMQ implementation of the queue contract.

use crate::config::BrokerConfig;
use crate::queue::{Delivery, QueueConnector, QueueConsumer, QueueError};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::uri::AMQPUri;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use tracing::{debug, info};

const CLOSE_REPLY_SUCCESS: u16 = 200;

/// Connects to RabbitMQ and consumes the work queue
pub struct AmqpConnector {
    config: BrokerConfig,
    consumer_tag: String,
}

impl AmqpConnector {
    pub fn new(config: BrokerConfig, consumer_tag: String) -> Self {
        AmqpConnector { config, consumer_tag }
    }

    fn uri(&self) -> AMQPUri {
        let mut uri = AMQPUri::default();
        uri.authority.host = self.config.host.clone();
        uri.authority.port = self.config.port;
        uri.authority.userinfo.username = self.config.user.clone();
        uri.authority.userinfo.password = self.config.password.clone();
        uri.vhost = self.config.vhost.clone();
        uri
    }
}

fn channel_error(e: lapin::Error) -> QueueError {
    QueueError::Channel(e.to_string())
}

impl AmqpConnector {
    /// Declare the queue and start consuming on a fresh channel
    async fn open_session(&self, connection: &Connection) -> Result<(Channel, Consumer), QueueError> {
        let channel = connection.create_channel().await.map_err(channel_error)?;

        // Idempotent: redeclaring a durable queue with the same options is a no-op
        channel
            .queue_declare(
                &self.config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(channel_error)?;

        channel
            .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(channel_error)?;

        let consumer = channel
            .basic_consume(
                &self.config.queue,
                &self.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(channel_error)?;

        Ok((channel, consumer))
    }
}

#[async_trait]
impl QueueConnector for AmqpConnector {
    async fn connect(&self) -> Result<Box<dyn QueueConsumer>, QueueError> {
        let connection = Connection::connect_uri(self.uri(), ConnectionProperties::default())
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        info!(
            "Connected to broker at {}:{}",
            self.config.host, self.config.port
        );

        let (channel, consumer) = match self.open_session(&connection).await {
            Ok(session) => session,
            Err(e) => {
                if let Err(close_err) = connection
                    .close(CLOSE_REPLY_SUCCESS, "session setup failed")
                    .await
                {
                    debug!("Connection close failed: {}", close_err);
                }
                return Err(e);
            }
        };

        info!(
            queue = %self.config.queue,
            prefetch = self.config.prefetch_count,
            consumer_tag = %self.consumer_tag,
            "Worker started, listening for tasks"
        );

        Ok(Box::new(AmqpConsumer {
            connection,
            channel,
            consumer,
        }))
    }
}

struct AmqpConsumer {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
}

#[async_trait]
impl QueueConsumer for AmqpConsumer {
    async fn next_delivery(&mut self) -> Option<Result<Box<dyn Delivery>, QueueError>> {
        let next = self.consumer.next().await?;
        Some(
            next.map(|delivery| Box::new(AmqpDelivery(delivery)) as Box<dyn Delivery>)
                .map_err(channel_error),
        )
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self.channel.close(CLOSE_REPLY_SUCCESS, "worker shutdown").await {
            debug!("Channel close failed: {}", e);
        }
        if let Err(e) = self.connection.close(CLOSE_REPLY_SUCCESS, "worker shutdown").await {
            debug!("Connection close failed: {}", e);
        }
    }
}

struct AmqpDelivery(lapin::message::Delivery);

#[async_trait]
impl Delivery for AmqpDelivery {
    fn body(&self) -> &[u8] {
        &self.0.data
    }

    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        self.0
            .acker
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| QueueError::Settle(e.to_string()))
    }

    async fn requeue(self: Box<Self>) -> Result<(), QueueError> {
        self.0
            .acker
            .nack(BasicNackOptions {
                requeue: true,
                ..Default::default()
            })
            .await
            .map(|_| ())
            .map_err(|e| QueueError::Settle(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_from_config() {
        let config = BrokerConfig {
            host: "mq.internal".to_string(),
            port: 5673,
            vhost: "tasks".to_string(),
            user: "worker".to_string(),
            password: "p@ss/word".to_string(),
            ..Default::default()
        };

        let uri = AmqpConnector::new(config, "tag".to_string()).uri();

        assert_eq!(uri.authority.host, "mq.internal");
        assert_eq!(uri.authority.port, 5673);
        assert_eq!(uri.authority.userinfo.username, "worker");
        assert_eq!(uri.authority.userinfo.password, "p@ss/word");
        assert_eq!(uri.vhost, "tasks");
    }

    #[tokio::test]
    async fn test_unreachable_broker() {
        let config = BrokerConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..Default::default()
        };

        let result = AmqpConnector::new(config, "tag".to_string()).connect().await;
        assert!(matches!(result, Err(QueueError::Connection(_))));
    }

    /// Needs a RabbitMQ broker at `RABBITMQ_HOST` (default `localhost`).
    #[tokio::test]
    #[ignore]
    async fn test_failed_setup_reports_channel_error() {
        let host = std::env::var("RABBITMQ_HOST").unwrap_or_else(|_| "localhost".to_string());
        let queue = format!("task-worker-setup-{}", uuid::Uuid::new_v4().simple());
        let config = BrokerConfig {
            host,
            queue: queue.clone(),
            ..Default::default()
        };
        let connector = AmqpConnector::new(config, "tag".to_string());

        // A transient queue under the same name makes the durable redeclare fail
        let existing = Connection::connect_uri(connector.uri(), ConnectionProperties::default())
            .await
            .unwrap();
        let channel = existing.create_channel().await.unwrap();
        channel
            .queue_declare(&queue, QueueDeclareOptions::default(), FieldTable::default())
            .await
            .unwrap();

        for _ in 0..3 {
            let result = connector.connect().await;
            assert!(matches!(result, Err(QueueError::Channel(_))));
        }

        existing.close(CLOSE_REPLY_SUCCESS, "done").await.unwrap();
    }
}
