use crate::dispatcher::Disposition;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Prometheus metrics for the worker
pub struct WorkerMetrics {
    pub registry: Registry,

    // Messages by task type and broker settlement
    pub messages_total: IntCounterVec,

    pub handler_duration: HistogramVec,

    pub persist_failures: IntCounter,
    pub broker_connect_failures: IntCounter,
}

impl WorkerMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let messages_total = IntCounterVec::new(
            Opts::new(
                "tq_worker_messages_total",
                "Messages processed by task type and disposition",
            ),
            &["task_type", "disposition"],
        )?;
        registry.register(Box::new(messages_total.clone()))?;

        let handler_duration = HistogramVec::new(
            HistogramOpts::new(
                "tq_worker_handler_duration_seconds",
                "Handler execution time in seconds",
            ),
            &["task_type"],
        )?;
        registry.register(Box::new(handler_duration.clone()))?;

        let persist_failures = IntCounter::new(
            "tq_worker_persist_failures_total",
            "Result writes that failed and caused a requeue",
        )?;
        registry.register(Box::new(persist_failures.clone()))?;

        let broker_connect_failures = IntCounter::new(
            "tq_worker_broker_connect_failures_total",
            "Failed attempts to open a consuming session",
        )?;
        registry.register(Box::new(broker_connect_failures.clone()))?;

        Ok(WorkerMetrics {
            registry,
            messages_total,
            handler_duration,
            persist_failures,
            broker_connect_failures,
        })
    }

    pub fn inc_messages(&self, task_type: &str, disposition: Disposition) {
        self.messages_total
            .with_label_values(&[task_type, disposition.as_str()])
            .inc();
    }

    pub fn observe_handler_duration(&self, task_type: &str, duration_secs: f64) {
        self.handler_duration
            .with_label_values(&[task_type])
            .observe(duration_secs);
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
