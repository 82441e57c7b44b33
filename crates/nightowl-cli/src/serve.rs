use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use nightowl_core::{NightowlConfig, RPC_VERSION};
use nightowl_scheduler::{FiredJob, Scheduler, SqliteJobStore};
use nightowl_tasks::{restore_jobs, SqliteTaskRepository, TaskRepository};
use nightowl_worker::{dispatch_fired, Orchestrator};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Scheduler service process.
pub async fn run(config: NightowlConfig) -> anyhow::Result<()> {
    let sched = &config.scheduler;
    info!(path = %config.database.path, "opening SQLite database");

    // each subsystem gets its own connection on the shared file
    let db = crate::open_db(&config)?;
    nightowl_scheduler::db::init_db(&db)?;
    nightowl_tasks::db::init_db(&db)?;
    drop(db);

    let (fired_tx, fired_rx) = mpsc::channel::<FiredJob>(256);
    let scheduler = Arc::new(Scheduler::new(
        Some(fired_tx),
        Duration::from_secs(sched.misfire_grace_secs),
    ));
    scheduler.add_store(
        sched.durable_store.clone(),
        Box::new(SqliteJobStore::new(crate::open_db(&config)?, sched.durable_store.clone())?),
    );

    let repo: Arc<dyn TaskRepository> = Arc::new(SqliteTaskRepository::new(crate::open_db(&config)?)?);
    let report = restore_jobs(repo.as_ref(), scheduler.as_ref(), Utc::now()).await;
    info!(restored = report.restored, failed = report.failed, "jobs restored from tasks");

    let orchestrator = Arc::new(Orchestrator::new(
        repo,
        Arc::new(crate::registry()),
        config.worker.concurrency,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(
        scheduler
            .clone()
            .run(Duration::from_millis(sched.tick_interval_ms), shutdown_rx.clone()),
    );
    tokio::spawn(dispatch_fired(orchestrator, fired_rx, shutdown_rx));

    let router = build_router(scheduler);
    let addr: SocketAddr = format!("{}:{}", sched.bind, sched.port).parse()?;
    info!("NightOwl scheduler listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    // stop the firing loop and the dispatcher
    let _ = shutdown_tx.send(true);
    Ok(())
}

/// RPC endpoint on `POST /` plus `GET /health`.
fn build_router(scheduler: Arc<Scheduler>) -> Router {
    let rpc = nightowl_rpc::server::router(Arc::new(nightowl_scheduler::service::methods(
        scheduler.clone(),
    )));
    Router::new()
        .route("/health", get(health_handler))
        .with_state(scheduler)
        .merge(rpc)
}

/// GET /health: liveness probe with the current job count.
async fn health_handler(State(scheduler): State<Arc<Scheduler>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rpc_version": RPC_VERSION,
        "job_count": scheduler.job_count(),
    }))
}
