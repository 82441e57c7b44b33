use nightowl_scheduler::ControlError;
use thiserror::Error;

/// Errors that can occur during task operations.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The requested task does not exist in the repository.
    #[error("task not found: {id}")]
    NotFound { id: String },

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The task definition document is malformed.
    #[error("invalid task definition: {0}")]
    Definition(String),

    /// A context path was empty or crossed a non-mapping value.
    #[error("invalid context path: {0}")]
    ContextPath(String),

    /// Reconciling with the scheduler failed.
    #[error("scheduler: {0}")]
    Scheduler(#[from] ControlError),
}

pub type Result<T> = std::result::Result<T, TaskError>;
