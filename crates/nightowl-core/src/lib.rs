//! `nightowl-core`: configuration, shared errors and constants used by every
//! NightOwl crate.

pub mod config;
pub mod error;

pub use config::NightowlConfig;
pub use error::{NightowlError, Result};

/// Actor name recorded on executions started by a scheduler fire.
pub const SCHEDULER_ACTOR: &str = "scheduler";

/// Entry point bound to every task job: runs a task by id.
///
/// Jobs carry `[task_id, actor]` as positional arguments.
pub const RUN_TASK_ENTRY_POINT: &str = "nightowl_worker::run_task";

/// Version string advertised in every RPC envelope.
pub const RPC_VERSION: &str = "2.0";
