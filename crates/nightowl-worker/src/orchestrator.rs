use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use futures_util::FutureExt;
use nightowl_tasks::{Context, Target, Task, TaskRepository, TaskResultStatus};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{PluginError, Result};
use crate::plugin::{PluginRegistry, ResultLog, UnitOfWork};

/// What [`Orchestrator::run_task`] did.
#[derive(Debug)]
pub enum RunOutcome {
    /// The id is not a task. No result was created.
    NotFound,
    /// Another execution holds the task. No result was created.
    AlreadyRunning,
    /// A callable returned.
    Completed { result_id: Uuid, value: Value },
    /// The execution failed before or while invoking its target. The result,
    /// if one was created, is already finalized.
    Failed {
        result_id: Option<Uuid>,
        error: String,
    },
    /// A module's units of work were submitted. The handle resolves to the
    /// final status once fan-in has run.
    Dispatched {
        result_id: Uuid,
        handle: JoinHandle<TaskResultStatus>,
    },
}

/// Runs tasks: claims the task, creates its result, invokes its target and
/// finalizes the result.
///
/// The orchestrator is the only place a result leaves `Running`. Units of
/// work may append logs but never set a terminal status. Whatever happens,
/// the claimed task is put back to `Pending`.
pub struct Orchestrator {
    repo: Arc<dyn TaskRepository>,
    registry: Arc<PluginRegistry>,
    permits: Arc<Semaphore>,
}

impl Orchestrator {
    /// `concurrency` bounds the units of work running at once across all
    /// executions of this orchestrator.
    pub fn new(repo: Arc<dyn TaskRepository>, registry: Arc<PluginRegistry>, concurrency: usize) -> Self {
        Self {
            repo,
            registry,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    #[instrument(skip(self))]
    pub async fn run_task(&self, task_id: &str, actor: &str) -> RunOutcome {
        let Ok(id) = Uuid::parse_str(task_id) else {
            warn!("task id is not a uuid");
            return RunOutcome::NotFound;
        };
        let task = match self.repo.get_task(id) {
            Ok(Some(task)) => task,
            Ok(None) => {
                warn!("task not found");
                return RunOutcome::NotFound;
            }
            Err(e) => {
                error!("failed to load task: {e}");
                return RunOutcome::Failed { result_id: None, error: e.to_string() };
            }
        };

        let result = match self.repo.begin_run(task.id, actor, Utc::now()) {
            Ok(Some(result)) => result,
            Ok(None) => {
                info!("task is already running; skipped");
                return RunOutcome::AlreadyRunning;
            }
            Err(e) => {
                error!("failed to start run: {e}");
                return RunOutcome::Failed { result_id: None, error: e.to_string() };
            }
        };
        info!(result_id = %result.id, "run started");

        let run = Run {
            repo: self.repo.clone(),
            task_id: task.id,
            log: ResultLog::new(self.repo.clone(), result.id),
        };
        let ctx = Context::for_run(task.id, result.id);
        match &task.target {
            Target::Callable(name) => self.run_callable(run, name, ctx).await,
            Target::Module(name) => self.run_module(run, name, &task, ctx).await,
        }
    }

    async fn run_callable(&self, run: Run, name: &str, ctx: Context) -> RunOutcome {
        let Some(callable) = self.registry.callable(name) else {
            return run.abort(PluginError::CallableNotFound(name.to_string()));
        };

        let outcome = AssertUnwindSafe(callable.call(ctx, &run.log))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(PluginError::Panicked(panic_message(&*panic))));
        match outcome {
            Ok(value) => {
                run.succeed(format!("Ran callable {name} successfully"));
                run.release();
                RunOutcome::Completed { result_id: run.log.result_id(), value }
            }
            Err(e) => run.abort(e),
        }
    }

    async fn run_module(&self, run: Run, name: &str, task: &Task, ctx: Context) -> RunOutcome {
        let Some(module) = self.registry.module(name) else {
            return run.abort(PluginError::ModuleNotFound(name.to_string()));
        };

        run.log.info(format!("Start to run module (module={name})"));
        let units = match AssertUnwindSafe(module.main(&ctx, &task.params)).catch_unwind().await {
            Ok(Ok(units)) => units,
            Ok(Err(e)) => return run.abort(e),
            Err(panic) => return run.abort(PluginError::Panicked(panic_message(&*panic))),
        };
        info!(module = name, units = units.len(), "dispatching units of work");

        let result_id = run.log.result_id();
        let handle = tokio::spawn(fan_out(
            run,
            name.to_string(),
            units,
            ctx,
            self.registry.clone(),
            self.permits.clone(),
        ));
        RunOutcome::Dispatched { result_id, handle }
    }
}

/// One claimed execution: its task and the log of its result.
struct Run {
    repo: Arc<dyn TaskRepository>,
    task_id: Uuid,
    log: ResultLog,
}

impl Run {
    /// Finalize as `Success` and log `message`, if the result is still open.
    fn succeed(&self, message: String) {
        if self.finish(TaskResultStatus::Success) {
            self.log.info(message);
        }
    }

    fn finish(&self, status: TaskResultStatus) -> bool {
        match self.repo.finish_result(self.log.result_id(), status, Utc::now()) {
            Ok(applied) => applied,
            Err(e) => {
                error!(result_id = %self.log.result_id(), "failed to finalize result: {e}");
                false
            }
        }
    }

    /// Put the task back to `Pending`.
    fn release(&self) {
        if let Err(e) = self.repo.mark_pending(self.task_id) {
            error!(task_id = %self.task_id, "failed to reset task status: {e}");
        }
    }

    fn abort(self, err: PluginError) -> RunOutcome {
        self.log.exception(err.to_string());
        self.finish(TaskResultStatus::Exception);
        self.release();
        RunOutcome::Failed {
            result_id: Some(self.log.result_id()),
            error: err.to_string(),
        }
    }
}

/// Run every unit on its own task, wait for all of them, then finalize once.
///
/// Any failing unit fails the whole batch.
async fn fan_out(
    run: Run,
    module: String,
    units: Vec<UnitOfWork>,
    ctx: Context,
    registry: Arc<PluginRegistry>,
    permits: Arc<Semaphore>,
) -> TaskResultStatus {
    let handles: Vec<JoinHandle<Result<Value>>> = units
        .iter()
        .cloned()
        .map(|unit| {
            let ctx = ctx.clone();
            let registry = registry.clone();
            let permits = permits.clone();
            let log = run.log.clone();
            tokio::spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| PluginError::Failed(e.to_string()))?;
                run_unit(&registry, unit, ctx, &log).await
            })
        })
        .collect();

    let failures: Vec<String> = units
        .iter()
        .zip(join_all(handles).await)
        .filter_map(|(unit, outcome)| {
            let reason = match outcome {
                Ok(Ok(_)) => return None,
                Ok(Err(e)) => e.to_string(),
                Err(join) if join.is_panic() => {
                    PluginError::Panicked(panic_message(&*join.into_panic())).to_string()
                }
                Err(join) => join.to_string(),
            };
            Some(format!("Failed to run plugin {unit}: {reason}"))
        })
        .collect();

    let status = if failures.is_empty() {
        run.succeed(format!("Ran module {module} successfully"));
        TaskResultStatus::Success
    } else {
        for failure in &failures {
            run.log.exception(failure);
        }
        run.finish(TaskResultStatus::Exception);
        TaskResultStatus::Exception
    };
    run.release();
    info!(task_id = %run.task_id, %status, "run finished");
    status
}

async fn run_unit(registry: &PluginRegistry, unit: UnitOfWork, ctx: Context, log: &ResultLog) -> Result<Value> {
    log.info(format!("Start to run plugin {unit}"));
    let plugin = registry
        .plugin(&unit.plugin)
        .ok_or_else(|| PluginError::PluginNotFound(unit.plugin.clone()))?;

    match plugin.call(&unit.operation, unit.args, unit.kwargs, ctx, log).await {
        Err(PluginError::UnknownOperation { plugin, operation }) => {
            log.error(format!("Operation {operation} not found on plugin {plugin}"));
            Ok(Value::Null)
        }
        outcome => outcome,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
