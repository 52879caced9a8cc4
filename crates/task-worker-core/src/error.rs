use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Malformed task message: {0}")]
    MalformedMessage(#[source] serde_json::Error),

    #[error("Invalid task payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TaskError>;
