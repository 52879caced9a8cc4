mod task;
mod error;

pub use task::{TaskId, TaskType, TaskPayload, TaskMessage, TaskStatus, TaskOutcome};
pub use error::{TaskError, Result};

/// Name of the durable work queue shared with the submission frontend.
pub const DEFAULT_QUEUE_NAME: &str = "task_queue";
