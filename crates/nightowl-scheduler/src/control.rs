use async_trait::async_trait;
use nightowl_rpc::RpcError;
use thiserror::Error;

use crate::engine::Scheduler;
use crate::error::SchedulerError;
use crate::trigger::TriggerSpec;
use crate::types::{JobChanges, JobInfo, NewJob};

/// Failure of a [`JobControl`] call.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The scheduler refused the operation (raised locally or rebuilt from
    /// the wire).
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// The call never got a scheduler answer, or the answer could not be
    /// rebuilt into a [`SchedulerError`].
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl ControlError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ControlError::Scheduler(e) if e.is_not_found())
    }
}

pub type ControlResult<T> = std::result::Result<T, ControlError>;

/// Job operations as seen by the rest of the system.
///
/// Implemented by the in-process [`Scheduler`] and by
/// [`SchedulerClient`](crate::SchedulerClient), which reaches a scheduler in
/// another process. Job ids are unique across stores, so id-based calls
/// search every store.
#[async_trait]
pub trait JobControl: Send + Sync {
    async fn get_job(&self, id: &str) -> ControlResult<Option<JobInfo>>;

    async fn get_jobs(&self, store: Option<&str>) -> ControlResult<Vec<JobInfo>>;

    /// Returns the id of the new job.
    async fn add_job(&self, job: NewJob, store: Option<&str>) -> ControlResult<String>;

    async fn modify_job(&self, id: &str, changes: JobChanges) -> ControlResult<String>;

    async fn reschedule_job(&self, id: &str, trigger: TriggerSpec) -> ControlResult<String>;

    async fn pause_job(&self, id: &str) -> ControlResult<String>;

    async fn resume_job(&self, id: &str) -> ControlResult<String>;

    async fn remove_job(&self, id: &str) -> ControlResult<()>;
}

#[async_trait]
impl JobControl for Scheduler {
    async fn get_job(&self, id: &str) -> ControlResult<Option<JobInfo>> {
        Ok(Scheduler::get_job(self, id)?)
    }

    async fn get_jobs(&self, store: Option<&str>) -> ControlResult<Vec<JobInfo>> {
        Ok(Scheduler::get_jobs(self, store)?)
    }

    async fn add_job(&self, job: NewJob, store: Option<&str>) -> ControlResult<String> {
        Ok(Scheduler::add_job(self, job, store)?)
    }

    async fn modify_job(&self, id: &str, changes: JobChanges) -> ControlResult<String> {
        Ok(Scheduler::modify_job(self, id, None, changes)?)
    }

    async fn reschedule_job(&self, id: &str, trigger: TriggerSpec) -> ControlResult<String> {
        Ok(Scheduler::reschedule_job(self, id, None, trigger)?)
    }

    async fn pause_job(&self, id: &str) -> ControlResult<String> {
        Ok(Scheduler::pause_job(self, id, None)?)
    }

    async fn resume_job(&self, id: &str) -> ControlResult<String> {
        Ok(Scheduler::resume_job(self, id, None)?)
    }

    async fn remove_job(&self, id: &str) -> ControlResult<()> {
        Ok(Scheduler::remove_job(self, id, None)?)
    }
}
