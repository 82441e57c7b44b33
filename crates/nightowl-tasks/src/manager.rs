use std::sync::Arc;

use chrono::{DateTime, Utc};
use nightowl_scheduler::JobControl;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, TaskError};
use crate::repository::TaskRepository;
use crate::types::{Task, TaskResultStatus};

/// Task lifecycle operations that keep the scheduler in step with the
/// repository.
///
/// The repository says whether and when a task should run; the scheduler
/// holds the armed timer. Every `save` pushes the task's intent to the
/// scheduler before the record is written.
pub struct TaskManager {
    repo: Arc<dyn TaskRepository>,
    control: Arc<dyn JobControl>,
}

/// A task joined with its job's next run time and its latest result.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    #[serde(flatten)]
    pub task: Task,
    pub next_run_time: Option<DateTime<Utc>>,
    pub last_result_status: Option<TaskResultStatus>,
    pub last_result_ran_at: Option<DateTime<Utc>>,
}

impl TaskManager {
    pub fn new(repo: Arc<dyn TaskRepository>, control: Arc<dyn JobControl>) -> Self {
        Self { repo, control }
    }

    /// Reconcile the task's scheduler job, then persist the record.
    ///
    /// | Job exists | Active | Action                                  |
    /// |------------|--------|-----------------------------------------|
    /// | yes        | yes    | reschedule, unless a date has elapsed   |
    /// | yes        | no     | remove the job                          |
    /// | no         | yes    | add, unless a date trigger has elapsed  |
    /// | no         | no     | nothing                                 |
    ///
    /// An unanchored interval is pinned to one period from now and the anchor
    /// is kept on the task, so saving again reproduces the same job. If the
    /// scheduler call fails the record is not written.
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    pub async fn save(&self, task: &mut Task) -> Result<()> {
        let now = Utc::now();
        task.trigger = task.trigger.clone().anchored(now);
        let id = task.id.to_string();

        match self.control.get_job(&id).await? {
            Some(_) if task.wants_job(now) => {
                self.control.reschedule_job(&id, task.trigger.clone()).await?;
                info!("job rescheduled");
            }
            Some(_) => {
                self.control.remove_job(&id).await?;
                info!(active = task.active, "job removed");
            }
            None if task.wants_job(now) => {
                self.control.add_job(task.job(), None).await?;
                info!("job added");
            }
            None => {}
        }

        task.updated_at = Some(now);
        self.repo.save_task(task)
    }

    /// Remove the task's job (best effort) and delete the record.
    ///
    /// Scheduler failures are logged and ignored so an unreachable scheduler
    /// never blocks deletion.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let task = self.get(id)?;
        if task.active {
            match self.control.remove_job(&id.to_string()).await {
                Ok(()) => info!(task_id = %id, "job removed"),
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(task_id = %id, "job removal failed; deleting anyway: {e}"),
            }
        }
        self.repo.delete_task(id)?;
        info!(task_id = %id, "task deleted");
        Ok(())
    }

    /// Build a task from its YAML definition and save it.
    pub async fn create(&self, definition: &str, actor: &str) -> Result<Task> {
        let mut task = Task::from_definition(definition, Some(actor))?;
        self.save(&mut task).await?;
        info!(task_id = %task.id, name = %task.name, "task created");
        Ok(task)
    }

    /// Replace a task's definition and save it.
    pub async fn update(&self, id: Uuid, definition: &str) -> Result<Task> {
        let mut task = self.get(id)?;
        task.apply_definition(definition)?;
        self.save(&mut task).await?;
        Ok(task)
    }

    pub async fn activate(&self, id: Uuid, actor: &str) -> Result<Task> {
        let mut task = self.get(id)?;
        task.active = true;
        task.last_activated_at = Some(Utc::now());
        task.last_activated_by = Some(actor.to_string());
        self.save(&mut task).await?;
        Ok(task)
    }

    /// No-op when the task is already inactive.
    pub async fn deactivate(&self, id: Uuid) -> Result<Task> {
        let mut task = self.get(id)?;
        if task.active {
            task.active = false;
            self.save(&mut task).await?;
        }
        Ok(task)
    }

    pub fn get(&self, id: Uuid) -> Result<Task> {
        self.repo
            .get_task(id)?
            .ok_or_else(|| TaskError::NotFound { id: id.to_string() })
    }

    /// Every task with its next run time. A scheduler that cannot be reached
    /// leaves `next_run_time` empty rather than failing the listing.
    pub async fn list(&self) -> Result<Vec<TaskSummary>> {
        let tasks = self.repo.list_tasks()?;
        let mut summaries = Vec::with_capacity(tasks.len());
        for task in tasks {
            let next_run_time = match self.control.get_job(&task.id.to_string()).await {
                Ok(job) => job.and_then(|j| j.next_run_time),
                Err(e) => {
                    warn!(task_id = %task.id, "could not read job: {e}");
                    None
                }
            };
            let last = match task.last_result {
                Some(result_id) => self.repo.get_result(result_id)?,
                None => None,
            };
            summaries.push(TaskSummary {
                next_run_time,
                last_result_status: last.as_ref().map(|r| r.status),
                last_result_ran_at: last.as_ref().map(|r| r.ran_at),
                task,
            });
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::SqliteTaskRepository;
    use nightowl_scheduler::Scheduler;
    use rusqlite::Connection;
    use std::time::Duration;

    fn setup() -> (TaskManager, Arc<Scheduler>) {
        let repo = Arc::new(SqliteTaskRepository::new(Connection::open_in_memory().unwrap()).unwrap());
        let scheduler = Arc::new(Scheduler::new(None, Duration::from_secs(1)));
        (TaskManager::new(repo, scheduler.clone()), scheduler)
    }

    fn future_date() -> String {
        let at = Utc::now() + chrono::Duration::days(1);
        format!(
            "name: once\ntrigger: date\nrun_date: {}\ncallable: noop\n",
            at.to_rfc3339()
        )
    }

    #[tokio::test]
    async fn future_date_task_gets_exactly_one_job() {
        let (manager, scheduler) = setup();
        let task = manager.create(&future_date(), "alice").await.unwrap();
        assert_eq!(scheduler.job_count(), 1);
        assert!(scheduler.get_job(&task.id.to_string()).unwrap().is_some());
    }

    #[tokio::test]
    async fn elapsed_date_task_gets_no_job() {
        let (manager, scheduler) = setup();
        manager
            .create(
                "name: past\ntrigger: date\nrun_date: 2020-01-01T00:00:00Z\ncallable: noop\n",
                "alice",
            )
            .await
            .unwrap();
        assert_eq!(scheduler.job_count(), 0);
    }

    #[tokio::test]
    async fn saving_twice_leaves_the_same_job() {
        let (manager, scheduler) = setup();
        let mut task = manager
            .create("name: poll\ntrigger: interval\nseconds: 30\ncallable: noop\n", "alice")
            .await
            .unwrap();
        let first = scheduler.get_job(&task.id.to_string()).unwrap().unwrap();

        manager.save(&mut task).await.unwrap();
        let second = scheduler.get_job(&task.id.to_string()).unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(scheduler.job_count(), 1);
    }

    #[tokio::test]
    async fn deactivate_removes_and_activate_restores() {
        let (manager, scheduler) = setup();
        let task = manager
            .create("name: c\ntrigger: cron\nminute: '*/5'\ncallable: noop\n", "alice")
            .await
            .unwrap();

        let task = manager.deactivate(task.id).await.unwrap();
        assert!(!task.active);
        assert_eq!(scheduler.job_count(), 0);
        // Already inactive: nothing to do.
        manager.deactivate(task.id).await.unwrap();

        let task = manager.activate(task.id, "bob").await.unwrap();
        assert_eq!(task.last_activated_by.as_deref(), Some("bob"));
        assert_eq!(scheduler.job_count(), 1);
    }

    #[tokio::test]
    async fn update_reschedules_existing_job() {
        let (manager, scheduler) = setup();
        let task = manager.create(&future_date(), "alice").await.unwrap();
        manager
            .update(task.id, "name: renamed\ntrigger: cron\nhour: 5\ncallable: noop\n")
            .await
            .unwrap();
        let job = scheduler.get_job(&task.id.to_string()).unwrap().unwrap();
        assert_eq!(job.trigger.kind(), nightowl_scheduler::TriggerKind::Cron);
        assert_eq!(manager.get(task.id).unwrap().name, "renamed");
    }

    #[tokio::test]
    async fn update_to_elapsed_date_removes_job() {
        let (manager, scheduler) = setup();
        let task = manager.create(&future_date(), "alice").await.unwrap();
        assert_eq!(scheduler.job_count(), 1);

        let task = manager
            .update(
                task.id,
                "name: once\ntrigger: date\nrun_date: 2020-01-01T00:00:00Z\ncallable: noop\n",
            )
            .await
            .unwrap();
        assert!(task.active);
        assert_eq!(scheduler.job_count(), 0);
        assert!(scheduler.get_job(&task.id.to_string()).unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_job_and_record() {
        let (manager, scheduler) = setup();
        let task = manager.create(&future_date(), "alice").await.unwrap();
        manager.delete(task.id).await.unwrap();
        assert_eq!(scheduler.job_count(), 0);
        assert!(matches!(manager.get(task.id), Err(TaskError::NotFound { .. })));
    }

    #[tokio::test]
    async fn list_joins_next_run_time() {
        let (manager, _scheduler) = setup();
        manager.create(&future_date(), "alice").await.unwrap();
        let listed = manager.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].next_run_time.is_some());
        assert!(listed[0].last_result_status.is_none());
    }
}
