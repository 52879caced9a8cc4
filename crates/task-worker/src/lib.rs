pub mod amqp;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod handler;
pub mod handlers;
pub mod metrics;
pub mod queue;

pub use amqp::AmqpConnector;
pub use config::WorkerConfig;
pub use consumer::{ConnectionState, ConsumerLoop};
pub use dispatcher::{DispatchReport, DispatchState, Dispatcher, Disposition};
pub use handler::{TaskHandler, TaskHandlerRegistry, TaskResult};
pub use metrics::WorkerMetrics;
