use std::sync::Arc;

use nightowl_core::{RUN_TASK_ENTRY_POINT, SCHEDULER_ACTOR};
use nightowl_scheduler::FiredJob;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::error::{PluginError, Result};
use crate::orchestrator::{Orchestrator, RunOutcome};

/// Resolve a fired job's entry point and run it.
pub async fn run_fired(orchestrator: &Orchestrator, job: &FiredJob) -> Result<RunOutcome> {
    match job.entry_point.as_str() {
        RUN_TASK_ENTRY_POINT => {
            let (task_id, actor) = run_task_args(&job.args)?;
            Ok(orchestrator.run_task(task_id, actor).await)
        }
        other => Err(PluginError::UnknownEntryPoint(other.to_string())),
    }
}

/// `run_task` takes `[task_id, actor?]`.
fn run_task_args(args: &[Value]) -> Result<(&str, &str)> {
    let task_id = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| PluginError::InvalidArguments("run_task needs a task id".into()))?;
    let actor = match args.get(1) {
        None | Some(Value::Null) => SCHEDULER_ACTOR,
        Some(Value::String(actor)) => actor.as_str(),
        Some(other) => {
            return Err(PluginError::InvalidArguments(format!("actor must be a string, got {other}")))
        }
    };
    Ok((task_id, actor))
}

/// Consume fired jobs until the channel closes or `shutdown` broadcasts
/// `true`. Each job runs on its own task so a slow callable never holds up
/// the next fire.
pub async fn dispatch_fired(
    orchestrator: Arc<Orchestrator>,
    mut fired: mpsc::Receiver<FiredJob>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("dispatcher started");
    loop {
        tokio::select! {
            job = fired.recv() => {
                let Some(job) = job else {
                    info!("fired-job channel closed");
                    break;
                };
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move {
                    match run_fired(&orchestrator, &job).await {
                        Ok(RunOutcome::NotFound) => {
                            warn!(job_id = %job.id, "fired job names no task")
                        }
                        Ok(_) => {}
                        Err(e) => error!(job_id = %job.id, entry_point = %job.entry_point, "cannot run fired job: {e}"),
                    }
                });
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("dispatcher shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::register_builtins;
    use crate::plugin::PluginRegistry;
    use chrono::Utc;
    use nightowl_tasks::{SqliteTaskRepository, Task, TaskRepository, TaskResultStatus};
    use rusqlite::Connection;
    use serde_json::{json, Map};

    fn fired(entry_point: &str, args: Vec<Value>) -> FiredJob {
        FiredJob {
            id: "job".into(),
            name: "job".into(),
            entry_point: entry_point.into(),
            args,
            kwargs: Map::new(),
            scheduled_for: Utc::now(),
        }
    }

    fn orchestrator() -> (Arc<Orchestrator>, Arc<SqliteTaskRepository>) {
        let repo = Arc::new(SqliteTaskRepository::new(Connection::open_in_memory().unwrap()).unwrap());
        let mut registry = PluginRegistry::new();
        register_builtins(&mut registry);
        (Arc::new(Orchestrator::new(repo.clone(), Arc::new(registry), 2)), repo)
    }

    #[test]
    fn actor_defaults_to_scheduler() {
        assert_eq!(run_task_args(&[json!("abc")]).unwrap(), ("abc", "scheduler"));
        assert_eq!(run_task_args(&[json!("abc"), json!("bob")]).unwrap(), ("abc", "bob"));
        assert!(run_task_args(&[]).is_err());
        assert!(run_task_args(&[json!("abc"), json!(3)]).is_err());
    }

    #[tokio::test]
    async fn unknown_entry_point_is_refused() {
        let (orchestrator, _repo) = orchestrator();
        let err = run_fired(&orchestrator, &fired("os.system", vec![])).await.unwrap_err();
        assert!(matches!(err, PluginError::UnknownEntryPoint(_)));
    }

    #[tokio::test]
    async fn fired_job_runs_its_task() {
        let (orchestrator, repo) = orchestrator();
        let task = Task::from_definition("name: n\ntrigger: cron\nhour: 1\ncallable: noop\n", None).unwrap();
        repo.save_task(&task).unwrap();

        let job = fired(RUN_TASK_ENTRY_POINT, vec![json!(task.id.to_string()), json!("scheduler")]);
        let outcome = run_fired(&orchestrator, &job).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed { .. }));

        let results = repo.list_results(task.id, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, TaskResultStatus::Success);
        assert_eq!(results[0].ran_by, "scheduler");
    }

    #[tokio::test]
    async fn dispatcher_stops_on_shutdown() {
        let (orchestrator, _repo) = orchestrator();
        let (_tx, rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(dispatch_fired(orchestrator, rx, shutdown_rx));
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
