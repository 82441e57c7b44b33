use chrono::{DateTime, Utc};
use nightowl_scheduler::JobControl;
use tracing::{error, info};

use crate::repository::TaskRepository;

/// Outcome of [`restore_jobs`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    /// Date tasks whose run time has passed.
    pub skipped: usize,
    pub failed: usize,
}

/// Re-arm a job for every active task at scheduler start.
///
/// Date tasks that can no longer fire are skipped. A task that fails to
/// restore is logged and the rest carry on.
pub async fn restore_jobs(
    repo: &dyn TaskRepository,
    control: &dyn JobControl,
    now: DateTime<Utc>,
) -> RestoreReport {
    let mut report = RestoreReport::default();
    let tasks = match repo.list_active() {
        Ok(tasks) => tasks,
        Err(e) => {
            error!("failed to load active tasks for restore: {e}");
            return report;
        }
    };

    for task in tasks {
        if !task.wants_job(now) {
            report.skipped += 1;
            continue;
        }
        match control.add_job(task.job(), None).await {
            Ok(id) => {
                info!(task_id = %id, "restored task");
                report.restored += 1;
            }
            Err(e) => {
                error!(task_id = %task.id, "failed to restore task: {e}");
                report.failed += 1;
            }
        }
    }
    info!(
        restored = report.restored,
        skipped = report.skipped,
        failed = report.failed,
        "task restore finished"
    );
    report
}
