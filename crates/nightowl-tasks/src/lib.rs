//! `nightowl-tasks`: the task model and its lifecycle hooks.
//!
//! A [`Task`] is built from a YAML definition, persisted through a
//! [`TaskRepository`], and kept in step with the scheduler by the
//! [`TaskManager`]: saving a task reconciles its scheduler job, deleting it
//! removes the job first. [`restore_jobs`] re-arms every active task when the
//! scheduler process starts.

pub mod context;
pub mod db;
pub mod definition;
pub mod error;
pub mod manager;
pub mod repository;
pub mod restore;
pub mod types;

pub use context::Context;
pub use definition::TaskDefinition;
pub use error::{Result, TaskError};
pub use manager::{TaskManager, TaskSummary};
pub use repository::{SqliteTaskRepository, TaskRepository};
pub use restore::{restore_jobs, RestoreReport};
pub use types::{LogLevel, Target, Task, TaskLog, TaskResult, TaskResultStatus, TaskStatus};
