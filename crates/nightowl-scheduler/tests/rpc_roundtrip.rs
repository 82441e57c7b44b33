//! Scheduler service and client talking over a real socket.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use nightowl_rpc::RpcError;
use nightowl_scheduler::{
    service, ControlError, JobChanges, JobControl, NewJob, Scheduler, SchedulerClient,
    SchedulerError, TriggerSpec,
};
use serde_json::json;

async fn serve() -> (Arc<Scheduler>, SchedulerClient) {
    let scheduler = Arc::new(Scheduler::new(None, Duration::from_secs(1)));
    let app = nightowl_rpc::server::router(Arc::new(service::methods(scheduler.clone())));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let client = SchedulerClient::new(
        format!("http://{addr}/"),
        Duration::from_secs(5),
        Duration::from_secs(1),
    )
    .unwrap();
    (scheduler, client)
}

#[tokio::test]
async fn job_lifecycle_over_rpc() {
    let (scheduler, client) = serve().await;
    let run_date = Utc::now() + ChronoDuration::hours(2);

    let id = client
        .add_job(
            NewJob::new("nightowl_worker::run_task", TriggerSpec::Date { run_date })
                .id("task-1")
                .name("report")
                .args(vec![json!("task-1"), json!("scheduler")]),
            None,
        )
        .await
        .unwrap();
    assert_eq!(id, "task-1");
    assert_eq!(scheduler.job_count(), 1);

    let info = client.get_job("task-1").await.unwrap().unwrap();
    assert_eq!(info.name, "report");
    assert_eq!(info.trigger, TriggerSpec::Date { run_date });
    assert_eq!(info.next_run_time, Some(run_date));

    let cron: TriggerSpec =
        serde_json::from_value(json!({"trigger": "cron", "day_of_week": "mon-fri", "hour": 7}))
            .unwrap();
    client.reschedule_job("task-1", cron.clone()).await.unwrap();
    assert_eq!(client.get_job("task-1").await.unwrap().unwrap().trigger, cron);

    client
        .modify_job(
            "task-1",
            JobChanges {
                name: Some("weekday report".into()),
                ..JobChanges::default()
            },
        )
        .await
        .unwrap();
    client.pause_job("task-1").await.unwrap();
    let paused = client.get_job("task-1").await.unwrap().unwrap();
    assert_eq!(paused.name, "weekday report");
    assert_eq!(paused.next_run_time, None);
    client.resume_job("task-1").await.unwrap();

    assert_eq!(client.get_jobs(None).await.unwrap().len(), 1);
    client.remove_job("task-1").await.unwrap();
    assert!(client.get_job("task-1").await.unwrap().is_none());
}

#[tokio::test]
async fn remote_errors_are_rebuilt_as_scheduler_errors() {
    let (_scheduler, client) = serve().await;

    let err = client.remove_job("missing").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(matches!(
        err,
        ControlError::Scheduler(SchedulerError::JobNotFound { ref id }) if id == "missing"
    ));

    let trigger = TriggerSpec::Date {
        run_date: Utc::now() + ChronoDuration::hours(1),
    };
    client
        .add_job(NewJob::new("noop", trigger.clone()).id("dup"), None)
        .await
        .unwrap();
    let err = client
        .add_job(NewJob::new("noop", trigger).id("dup"), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ControlError::Scheduler(SchedulerError::ConflictingId { .. })
    ));
}

#[tokio::test]
async fn unreachable_scheduler_fails_fast() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = SchedulerClient::new(
        format!("http://127.0.0.1:{port}/"),
        Duration::from_millis(500),
        Duration::from_millis(200),
    )
    .unwrap();

    let started = std::time::Instant::now();
    let err = client.get_job("any").await.unwrap_err();
    assert!(matches!(err, ControlError::Rpc(RpcError::Transport(_))));
    assert!(!err.is_not_found());
    assert!(started.elapsed() < Duration::from_secs(3));
}
