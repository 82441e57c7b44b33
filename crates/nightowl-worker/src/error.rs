use nightowl_tasks::TaskError;
use thiserror::Error;

/// Failures raised while resolving or running units of work.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    #[error("module not found: {0}")]
    ModuleNotFound(String),

    #[error("callable not found: {0}")]
    CallableNotFound(String),

    /// The plugin exists but has no such operation. Recoverable: the unit
    /// logs it and yields null.
    #[error("operation not found: {plugin}.{operation}")]
    UnknownOperation { plugin: String, operation: String },

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Raised by the unit of work itself.
    #[error("{0}")]
    Failed(String),

    #[error("panicked: {0}")]
    Panicked(String),

    /// The entry point named by a fired job is not one this worker runs.
    #[error("unknown entry point: {0}")]
    UnknownEntryPoint(String),

    #[error(transparent)]
    Task(#[from] TaskError),
}

pub type Result<T> = std::result::Result<T, PluginError>;
