//! Error types for the subscription registry.

use chainwatch_core::types::{IntervalKey, TaskRef};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown task {0}")]
    UnknownTask(TaskRef),

    #[error("unknown interval subscription {0}")]
    UnknownInterval(IntervalKey),

    #[error("task chain {task_chain} does not match account chain {account_chain}")]
    ScopeMismatch {
        task_chain: String,
        account_chain: String,
    },

    #[error("backup is not valid JSON: {0}")]
    Backup(#[from] serde_json::Error),
}
