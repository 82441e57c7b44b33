//! Task save/delete against a scheduler, restore at startup, and behaviour
//! when the scheduler cannot be reached.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use nightowl_scheduler::{NewJob, Scheduler, SchedulerClient, TriggerSpec};
use nightowl_tasks::{restore_jobs, SqliteTaskRepository, Task, TaskError, TaskManager, TaskRepository};
use rusqlite::Connection;

fn repo() -> Arc<SqliteTaskRepository> {
    Arc::new(SqliteTaskRepository::new(Connection::open_in_memory().unwrap()).unwrap())
}

fn scheduler() -> Arc<Scheduler> {
    Arc::new(Scheduler::new(None, Duration::from_secs(1)))
}

fn unreachable_client() -> Arc<SchedulerClient> {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    Arc::new(
        SchedulerClient::new(
            format!("http://127.0.0.1:{port}/"),
            Duration::from_millis(500),
            Duration::from_millis(200),
        )
        .unwrap(),
    )
}

fn date_definition(at: chrono::DateTime<Utc>) -> String {
    format!("name: report\ntrigger: date\nrun_date: {}\nmodule: echo\n", at.to_rfc3339())
}

#[tokio::test]
async fn future_date_task_is_not_restored_once_elapsed() {
    let repo = repo();
    let run_date = Utc::now() + ChronoDuration::minutes(10);

    let first = scheduler();
    let manager = TaskManager::new(repo.clone(), first.clone());
    let task = manager.create(&date_definition(run_date), "alice").await.unwrap();
    assert_eq!(first.job_count(), 1);

    // The scheduler restarts after the date went by without a run.
    let restarted = scheduler();
    let report = restore_jobs(repo.as_ref(), restarted.as_ref(), run_date + ChronoDuration::hours(1)).await;
    assert_eq!(report.skipped, 1);
    assert_eq!(report.restored, 0);
    assert!(restarted.get_job(&task.id.to_string()).unwrap().is_none());
}

#[tokio::test]
async fn restore_rearms_active_tasks_and_survives_failures() {
    let repo = repo();
    let mut ids = Vec::new();
    for def in [
        "name: a\ntrigger: interval\nminutes: 5\ncallable: noop\n",
        "name: b\ntrigger: cron\nhour: 1\ncallable: noop\n",
        "name: c\ntrigger: cron\nhour: 2\ncallable: noop\n",
    ] {
        let task = Task::from_definition(def, None).unwrap();
        ids.push(task.id);
        repo.save_task(&task).unwrap();
    }
    let mut inactive = Task::from_definition("name: off\ntrigger: cron\nhour: 3\ncallable: noop\n", None).unwrap();
    inactive.active = false;
    repo.save_task(&inactive).unwrap();

    // Occupy one id so its restore fails.
    let s = scheduler();
    s.add_job(
        NewJob::new("noop", TriggerSpec::Date { run_date: Utc::now() + ChronoDuration::days(1) })
            .id(ids[1].to_string()),
        None,
    )
    .unwrap();

    let report = restore_jobs(repo.as_ref(), s.as_ref(), Utc::now()).await;
    assert_eq!(report.restored, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(s.job_count(), 3);
    assert!(s.get_job(&inactive.id.to_string()).unwrap().is_none());
    let job = s.get_job(&ids[0].to_string()).unwrap().unwrap();
    assert_eq!(job.entry_point, "nightowl_worker::run_task");
    assert_eq!(job.args[0], serde_json::json!(ids[0].to_string()));
}

#[tokio::test]
async fn delete_succeeds_while_scheduler_is_unreachable() {
    let repo = repo();
    let task = Task::from_definition(&date_definition(Utc::now() + ChronoDuration::days(1)), None).unwrap();
    repo.save_task(&task).unwrap();
    assert!(task.active);

    let manager = TaskManager::new(repo.clone(), unreachable_client());
    manager.delete(task.id).await.unwrap();
    assert!(repo.get_task(task.id).unwrap().is_none());
}

#[tokio::test]
async fn save_fails_and_writes_nothing_while_scheduler_is_unreachable() {
    let repo = repo();
    let manager = TaskManager::new(repo.clone(), unreachable_client());
    let err = manager
        .create(&date_definition(Utc::now() + ChronoDuration::days(1)), "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::Scheduler(_)));
    assert!(repo.list_tasks().unwrap().is_empty());
}

#[tokio::test]
async fn delete_of_unknown_task_is_not_found() {
    let manager = TaskManager::new(repo(), scheduler());
    let err = manager.delete(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, TaskError::NotFound { .. }));
}
