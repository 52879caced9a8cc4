use crate::{PersistOutcome, PersistenceError, Result, ResultStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use task_worker_core::{TaskId, TaskOutcome};

/// Row as held by [`InMemoryResultStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub status: String,
    pub result: Option<String>,
}

/// In-process result store with the same update-only semantics as the
/// PostgreSQL store. Used for tests and local runs.
#[derive(Default)]
pub struct InMemoryResultStore {
    rows: Mutex<HashMap<TaskId, StoredRow>>,
    unavailable: AtomicBool,
    writes: AtomicUsize,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pending row, as the submission frontend would
    pub fn insert_pending(&self, task_id: TaskId) {
        self.rows.lock().insert(
            task_id,
            StoredRow {
                status: "pending".to_string(),
                result: None,
            },
        );
    }

    pub fn get(&self, task_id: &TaskId) -> Option<StoredRow> {
        self.rows.lock().get(task_id).cloned()
    }

    /// Make every subsequent persist fail until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of committed writes
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn persist(&self, task_id: &TaskId, outcome: &TaskOutcome) -> Result<PersistOutcome> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("store is offline".to_string()));
        }

        let mut rows = self.rows.lock();
        let rows_affected = match rows.get_mut(task_id) {
            Some(row) => {
                row.status = outcome.status.as_str().to_string();
                row.result = outcome.result.clone();
                1
            }
            None => 0,
        };
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(PersistOutcome { rows_affected })
    }
}
