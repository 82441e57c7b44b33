use nightowl_rpc::RemoteException;
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No job with the given ID exists in the store.
    #[error("No job by the id of {id} was found")]
    JobNotFound { id: String },

    /// `add_job` with an ID that is already taken.
    #[error("Job identifier ({id}) conflicts with an existing job")]
    ConflictingId { id: String },

    #[error("No such job store: {0}")]
    UnknownStore(String),

    /// The trigger descriptor is malformed or can never be evaluated.
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A storage failure rebuilt from the wire; only the message survives.
    #[error("{0}")]
    Storage(String),
}

impl SchedulerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SchedulerError::JobNotFound { .. })
    }
}

impl RemoteException for SchedulerError {
    const MODULE_PATH: &'static str = "nightowl_scheduler::error";

    fn type_name(&self) -> &'static str {
        match self {
            SchedulerError::JobNotFound { .. } => "JobLookupError",
            SchedulerError::ConflictingId { .. } => "ConflictingIdError",
            SchedulerError::UnknownStore(_) => "KeyError",
            SchedulerError::InvalidTrigger(_) => "InvalidTrigger",
            SchedulerError::Database(_)
            | SchedulerError::Serialization(_)
            | SchedulerError::Storage(_) => "StorageError",
        }
    }

    fn args(&self) -> Vec<Value> {
        let arg = match self {
            SchedulerError::JobNotFound { id } | SchedulerError::ConflictingId { id } => id.clone(),
            SchedulerError::UnknownStore(s)
            | SchedulerError::InvalidTrigger(s)
            | SchedulerError::Storage(s) => s.clone(),
            other => other.to_string(),
        };
        vec![Value::String(arg)]
    }

    fn type_names() -> &'static [&'static str] {
        &[
            "JobLookupError",
            "ConflictingIdError",
            "KeyError",
            "InvalidTrigger",
            "StorageError",
        ]
    }

    fn from_args(type_name: &str, args: &[Value]) -> Option<Self> {
        let [arg] = args else { return None };
        let arg = arg.as_str()?.to_string();
        Some(match type_name {
            "JobLookupError" => SchedulerError::JobNotFound { id: arg },
            "ConflictingIdError" => SchedulerError::ConflictingId { id: arg },
            "KeyError" => SchedulerError::UnknownStore(arg),
            "InvalidTrigger" => SchedulerError::InvalidTrigger(arg),
            "StorageError" => SchedulerError::Storage(arg),
            _ => return None,
        })
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
