//! `nightowl-worker`: runs tasks.
//!
//! The [`Orchestrator`] claims a task, creates its result and invokes its
//! target. A callable runs in place; a module yields units of work that fan
//! out onto tokio tasks and fan back in to a single finalization. Plugins,
//! modules and callables are resolved by name from a [`PluginRegistry`]
//! filled at start-up.

pub mod builtin;
pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod plugin;

pub use builtin::register_builtins;
pub use dispatcher::{dispatch_fired, run_fired};
pub use error::{PluginError, Result};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use plugin::{Callable, Module, Plugin, PluginRegistry, ResultLog, UnitOfWork};
