use clap::{Parser, Subcommand};
use tracing::info;
use uuid::Uuid;

use nightowl_core::NightowlConfig;

mod serve;
mod task;

#[derive(Parser)]
#[command(name = "nightowl", version, about = "Task scheduling and execution")]
struct Cli {
    /// Path to nightowl.toml (default: NIGHTOWL_CONFIG, then ~/.nightowl/nightowl.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Name recorded as the actor of runs and activations
    #[arg(long, global = true)]
    actor: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler service: restore jobs, fire them, serve RPC
    Scheduler,
    /// List scheduler jobs
    Jobs {
        #[arg(long)]
        store: Option<String>,
    },
    /// Manage and run tasks
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },
}

#[derive(Subcommand)]
enum TaskCommand {
    /// Create a task from a YAML definition file
    Add { definition: String },
    /// Replace a task's definition
    Update { id: Uuid, definition: String },
    Delete { id: Uuid },
    Activate { id: Uuid },
    Deactivate { id: Uuid },
    List,
    /// Run a task now and wait for it to finish
    Run { id: Uuid },
    /// Results of a task, newest first
    Results {
        id: Uuid,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// One result with its logs
    Result { id: Uuid },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nightowl=info,nightowl_scheduler=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = NightowlConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        NightowlConfig::default()
    });
    let actor = cli
        .actor
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "cli".to_string());

    match cli.command {
        Command::Scheduler => serve::run(config).await,
        Command::Jobs { store } => {
            use nightowl_scheduler::JobControl;
            let client = nightowl_scheduler::SchedulerClient::from_config(&config.scheduler)?;
            info!(url = %client.url(), "listing jobs");
            let jobs = client.get_jobs(store.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&jobs)?);
            Ok(())
        }
        Command::Task { command } => task::run(&config, &actor, command).await,
    }
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

/// Open the shared SQLite file, creating its directory if needed.
fn open_db(config: &NightowlConfig) -> anyhow::Result<rusqlite::Connection> {
    let path = &config.database.path;
    ensure_parent_dir(path);
    let db = rusqlite::Connection::open(path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    Ok(db)
}

/// A registry holding the built-in units of work.
fn registry() -> nightowl_worker::PluginRegistry {
    let mut registry = nightowl_worker::PluginRegistry::new();
    nightowl_worker::register_builtins(&mut registry);
    registry
}
