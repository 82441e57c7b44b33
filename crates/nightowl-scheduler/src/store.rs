use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::{Result, SchedulerError};
use crate::types::Job;

/// Storage backend for one named set of jobs.
///
/// Implementations are owned by the [`Scheduler`](crate::Scheduler), which
/// serializes every call; nothing else mutates a store.
pub trait JobStore: Send {
    /// Insert a new job; `ConflictingId` if the id is taken.
    fn add(&mut self, job: Job) -> Result<()>;

    /// Replace an existing job; `JobNotFound` if it is absent.
    fn update(&mut self, job: Job) -> Result<()>;

    /// Delete by id; `JobNotFound` if it is absent.
    fn remove(&mut self, id: &str) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<Job>>;

    fn all(&self) -> Result<Vec<Job>>;

    /// Unpaused jobs whose next run time is at or before `now`, earliest first.
    fn due(&self, now: DateTime<Utc>) -> Result<Vec<Job>>;
}

/// Process-local store; its jobs are gone when the process exits.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: BTreeMap<String, Job>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn add(&mut self, job: Job) -> Result<()> {
        if self.jobs.contains_key(&job.id) {
            return Err(SchedulerError::ConflictingId { id: job.id });
        }
        self.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    fn update(&mut self, job: Job) -> Result<()> {
        match self.jobs.get_mut(&job.id) {
            Some(slot) => {
                *slot = job;
                Ok(())
            }
            None => Err(SchedulerError::JobNotFound { id: job.id }),
        }
    }

    fn remove(&mut self, id: &str) -> Result<()> {
        self.jobs
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })
    }

    fn get(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.jobs.get(id).cloned())
    }

    fn all(&self) -> Result<Vec<Job>> {
        Ok(self.jobs.values().cloned().collect())
    }

    fn due(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let mut due: Vec<Job> = self
            .jobs
            .values()
            .filter(|job| job.next_run_time.is_some_and(|t| t <= now))
            .cloned()
            .collect();
        due.sort_by_key(|job| job.next_run_time);
        Ok(due)
    }
}
