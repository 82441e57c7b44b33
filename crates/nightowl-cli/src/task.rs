//! Front-end task commands: write the task repository and reconcile with the
//! scheduler over RPC.

use std::sync::Arc;

use anyhow::{bail, Context as _};
use nightowl_core::NightowlConfig;
use nightowl_scheduler::SchedulerClient;
use nightowl_tasks::{SqliteTaskRepository, TaskManager, TaskRepository};
use nightowl_worker::{Orchestrator, RunOutcome};
use tracing::info;

use crate::TaskCommand;

pub async fn run(config: &NightowlConfig, actor: &str, command: TaskCommand) -> anyhow::Result<()> {
    let repo: Arc<dyn TaskRepository> = Arc::new(SqliteTaskRepository::new(crate::open_db(config)?)?);
    let client = Arc::new(SchedulerClient::from_config(&config.scheduler)?);
    let manager = TaskManager::new(repo.clone(), client);

    match command {
        TaskCommand::Add { definition } => {
            let task = manager.create(&read_definition(&definition)?, actor).await?;
            print_json(&task)
        }
        TaskCommand::Update { id, definition } => {
            let task = manager.update(id, &read_definition(&definition)?).await?;
            print_json(&task)
        }
        TaskCommand::Delete { id } => {
            manager.delete(id).await?;
            println!("deleted {id}");
            Ok(())
        }
        TaskCommand::Activate { id } => print_json(&manager.activate(id, actor).await?),
        TaskCommand::Deactivate { id } => print_json(&manager.deactivate(id).await?),
        TaskCommand::List => print_json(&manager.list().await?),
        TaskCommand::Run { id } => run_now(config, repo, id, actor).await,
        TaskCommand::Results { id, limit } => print_json(&repo.list_results(id, limit)?),
        TaskCommand::Result { id } => match repo.get_result(id)? {
            Some(result) => print_json(&result),
            None => bail!("result not found: {id}"),
        },
    }
}

/// Run a task in this process and wait for fan-in.
async fn run_now(
    config: &NightowlConfig,
    repo: Arc<dyn TaskRepository>,
    id: uuid::Uuid,
    actor: &str,
) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::new(repo, Arc::new(crate::registry()), config.worker.concurrency);
    match orchestrator.run_task(&id.to_string(), actor).await {
        RunOutcome::NotFound => bail!("task not found: {id}"),
        RunOutcome::AlreadyRunning => {
            println!("task {id} is already running");
            Ok(())
        }
        RunOutcome::Completed { result_id, value } => {
            info!(%result_id, "callable finished");
            print_json(&value)
        }
        RunOutcome::Failed { result_id, error } => match result_id {
            Some(result_id) => bail!("run {result_id} failed: {error}"),
            None => bail!("run failed: {error}"),
        },
        RunOutcome::Dispatched { result_id, handle } => {
            let status = handle.await.context("fan-in did not complete")?;
            println!("{result_id}: {status}");
            Ok(())
        }
    }
}

fn read_definition(path: &str) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("cannot read task definition {path}"))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
