mod store;
mod memory;

pub use store::{ResultStore, PgResultStore, ResultStoreConfig, PersistOutcome};
pub use memory::{InMemoryResultStore, StoredRow};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
