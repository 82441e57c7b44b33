use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use nightowl_core::config::MEMORY_STORE;

use crate::{
    error::{Result, SchedulerError},
    store::{JobStore, MemoryJobStore},
    trigger::{Trigger, TriggerSpec},
    types::{FiredJob, Job, JobChanges, JobInfo, NewJob},
};

type Stores = BTreeMap<String, Box<dyn JobStore>>;

/// Owns every job store and fires due jobs.
///
/// All job mutations go through these methods; the RPC bindings in
/// [`service`](crate::service) are a thin layer over them. The store map sits
/// behind a mutex so request handlers and the firing loop never interleave
/// inside a store.
pub struct Scheduler {
    stores: Mutex<Stores>,
    /// If set, fired jobs are sent here for dispatch.
    fired_tx: Option<mpsc::Sender<FiredJob>>,
    misfire_grace: chrono::Duration,
}

impl Scheduler {
    /// A scheduler with only the transient `default` store.
    ///
    /// Fired jobs go to `fired_tx` if given. The sender is non-blocking
    /// (`try_send`) so the firing loop is never stalled by a slow consumer.
    pub fn new(fired_tx: Option<mpsc::Sender<FiredJob>>, misfire_grace: Duration) -> Self {
        let mut stores: Stores = BTreeMap::new();
        stores.insert(MEMORY_STORE.to_string(), Box::new(MemoryJobStore::new()));
        Self {
            stores: Mutex::new(stores),
            fired_tx,
            misfire_grace: chrono::Duration::from_std(misfire_grace)
                .unwrap_or_else(|_| chrono::Duration::seconds(1)),
        }
    }

    /// Register (or replace) a named store.
    pub fn add_store(&self, name: impl Into<String>, store: Box<dyn JobStore>) {
        let name = name.into();
        info!(store = %name, "job store added");
        self.stores().insert(name, store);
    }

    /// Add a job to `store` (default: the transient store). Returns its id.
    pub fn add_job(&self, new: NewJob, store: Option<&str>) -> Result<String> {
        let now = Utc::now();
        let mut stores = self.stores();
        let id = new.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if find(&stores, &id)?.is_some() {
            return Err(SchedulerError::ConflictingId { id });
        }

        let trigger = Trigger::new(new.trigger, now)?;
        let next_run_time = trigger.next_fire_time(None, now);
        let job = Job {
            name: new.name.unwrap_or_else(|| new.entry_point.clone()),
            id: id.clone(),
            trigger,
            entry_point: new.entry_point,
            args: new.args,
            kwargs: new.kwargs,
            next_run_time,
        };

        let store_name = store.unwrap_or(MEMORY_STORE);
        let target = stores
            .get_mut(store_name)
            .ok_or_else(|| SchedulerError::UnknownStore(store_name.to_string()))?;
        info!(
            job_id = %id,
            entry_point = %job.entry_point,
            args = ?job.args,
            store = %store_name,
            next_run_time = ?next_run_time,
            "job added"
        );
        target.add(job)?;
        Ok(id)
    }

    /// Change a job's name, entry point or arguments in place.
    pub fn modify_job(&self, id: &str, store: Option<&str>, changes: JobChanges) -> Result<String> {
        let mut stores = self.stores();
        let (name, mut job) = locate(&stores, id, store)?;
        changes.apply(&mut job);
        info!(job_id = %id, entry_point = %job.entry_point, args = ?job.args, "job modified");
        store_mut(&mut stores, &name)?.update(job)?;
        Ok(id.to_string())
    }

    /// Swap a job's trigger and recompute its next run time. A trigger whose
    /// next fire is already older than the misfire grace period removes the
    /// job instead.
    pub fn reschedule_job(
        &self,
        id: &str,
        store: Option<&str>,
        trigger: TriggerSpec,
    ) -> Result<String> {
        let now = Utc::now();
        let mut stores = self.stores();
        let (name, mut job) = locate(&stores, id, store)?;
        let trigger = Trigger::new(trigger, now)?;
        let target = store_mut(&mut stores, &name)?;
        match trigger.next_fire_time(None, now) {
            Some(next) if now - next <= self.misfire_grace => {
                job.next_run_time = Some(next);
                job.trigger = trigger;
                info!(job_id = %id, next_run_time = %next, "job rescheduled");
                target.update(job)?;
            }
            next => {
                target.remove(id)?;
                info!(job_id = %id, next_run_time = ?next, "rescheduled past the grace period; removed");
            }
        }
        Ok(id.to_string())
    }

    /// Stop a job from firing without removing it.
    pub fn pause_job(&self, id: &str, store: Option<&str>) -> Result<String> {
        let mut stores = self.stores();
        let (name, mut job) = locate(&stores, id, store)?;
        job.next_run_time = None;
        store_mut(&mut stores, &name)?.update(job)?;
        info!(job_id = %id, "job paused");
        Ok(id.to_string())
    }

    /// Resume a paused job. A job whose trigger has nothing left to fire is
    /// removed instead.
    pub fn resume_job(&self, id: &str, store: Option<&str>) -> Result<String> {
        let now = Utc::now();
        let mut stores = self.stores();
        let (name, mut job) = locate(&stores, id, store)?;
        let target = store_mut(&mut stores, &name)?;
        match job.trigger.next_fire_time(None, now) {
            Some(next) => {
                job.next_run_time = Some(next);
                target.update(job)?;
                info!(job_id = %id, next_run_time = %next, "job resumed");
            }
            None => {
                target.remove(id)?;
                info!(job_id = %id, "job finished on resume; removed");
            }
        }
        Ok(id.to_string())
    }

    pub fn remove_job(&self, id: &str, store: Option<&str>) -> Result<()> {
        let mut stores = self.stores();
        let (name, _) = locate(&stores, id, store)?;
        store_mut(&mut stores, &name)?.remove(id)?;
        info!(job_id = %id, store = %name, "job removed");
        Ok(())
    }

    /// Projection of one job, searched across all stores.
    pub fn get_job(&self, id: &str) -> Result<Option<JobInfo>> {
        let stores = self.stores();
        let found = find(&stores, id)?;
        match &found {
            Some((store, _)) => debug!(job_id = %id, %store, "got job"),
            None => debug!(job_id = %id, "job not found"),
        }
        Ok(found.map(|(store, job)| job.info(&store)))
    }

    /// Projections of every job in `store`, or in all stores.
    pub fn get_jobs(&self, store: Option<&str>) -> Result<Vec<JobInfo>> {
        let stores = self.stores();
        if let Some(wanted) = store {
            if !stores.contains_key(wanted) {
                return Err(SchedulerError::UnknownStore(wanted.to_string()));
            }
        }
        let mut jobs = Vec::new();
        for (name, s) in stores.iter() {
            if store.is_some_and(|wanted| wanted != name.as_str()) {
                continue;
            }
            jobs.extend(s.all()?.iter().map(|job| job.info(name)));
        }
        Ok(jobs)
    }

    pub fn job_count(&self) -> usize {
        self.stores()
            .values()
            .map(|s| s.all().map(|jobs| jobs.len()).unwrap_or(0))
            .sum()
    }

    /// Main event loop. Polls every `every` until `shutdown` broadcasts `true`.
    pub async fn run(self: Arc<Self>, every: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(tick_ms = every.as_millis() as u64, "scheduler started");

        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(Utc::now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Process every job whose next run time has arrived. Returns the number
    /// of jobs fired.
    ///
    /// Missed runs collapse into one; if even the latest of them is older than
    /// the misfire grace the job is skipped for this round. Jobs whose trigger
    /// is exhausted are removed.
    pub fn tick(&self, now: DateTime<Utc>) -> usize {
        let mut fired = 0;
        let mut stores = self.stores();
        for (store_name, store) in stores.iter_mut() {
            let due = match store.due(now) {
                Ok(due) => due,
                Err(e) => {
                    error!(store = %store_name, "failed to query due jobs: {e}");
                    continue;
                }
            };

            for mut job in due {
                let Some(scheduled) = latest_run_time(&job, now) else {
                    continue;
                };

                if now - scheduled > self.misfire_grace {
                    warn!(
                        job_id = %job.id,
                        scheduled = %scheduled,
                        "run time missed by more than the grace period; skipped"
                    );
                } else {
                    self.dispatch(&job, scheduled);
                    fired += 1;
                }

                job.next_run_time = job.trigger.next_fire_time(Some(scheduled), now);
                let outcome = match job.next_run_time {
                    Some(_) => store.update(job.clone()),
                    None => {
                        info!(job_id = %job.id, "job has no further run times; removed");
                        store.remove(&job.id)
                    }
                };
                if let Err(e) = outcome {
                    error!(job_id = %job.id, store = %store_name, "failed to advance job: {e}");
                }
            }
        }
        fired
    }

    fn dispatch(&self, job: &Job, scheduled: DateTime<Utc>) {
        info!(job_id = %job.id, name = %job.name, entry_point = %job.entry_point, "firing job");
        let Some(tx) = &self.fired_tx else {
            return;
        };
        let fired = FiredJob {
            id: job.id.clone(),
            name: job.name.clone(),
            entry_point: job.entry_point.clone(),
            args: job.args.clone(),
            kwargs: job.kwargs.clone(),
            scheduled_for: scheduled,
        };
        if tx.try_send(fired).is_err() {
            warn!(job_id = %job.id, "dispatch channel full or closed; job dropped");
        }
    }

    fn stores(&self) -> MutexGuard<'_, Stores> {
        self.stores.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The most recent due run time of `job`, walking forward from its stored
/// next run time.
fn latest_run_time(job: &Job, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let mut latest = job.next_run_time.filter(|t| *t <= now)?;
    while let Some(next) = job.trigger.next_fire_time(Some(latest), now) {
        if next > now {
            break;
        }
        latest = next;
    }
    Some(latest)
}

fn find(stores: &Stores, id: &str) -> Result<Option<(String, Job)>> {
    for (name, store) in stores {
        if let Some(job) = store.get(id)? {
            return Ok(Some((name.clone(), job)));
        }
    }
    Ok(None)
}

/// Find `id` in `store`, or in whichever store holds it.
fn locate(stores: &Stores, id: &str, store: Option<&str>) -> Result<(String, Job)> {
    let found = match store {
        Some(name) => {
            let s = stores
                .get(name)
                .ok_or_else(|| SchedulerError::UnknownStore(name.to_string()))?;
            s.get(id)?.map(|job| (name.to_string(), job))
        }
        None => find(stores, id)?,
    };
    found.ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })
}

fn store_mut<'a>(stores: &'a mut Stores, name: &str) -> Result<&'a mut Box<dyn JobStore>> {
    stores
        .get_mut(name)
        .ok_or_else(|| SchedulerError::UnknownStore(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteJobStore;
    use chrono::Duration as ChronoDuration;
    use rusqlite::Connection;
    use serde_json::json;

    fn scheduler() -> Scheduler {
        Scheduler::new(None, Duration::from_secs(1))
    }

    fn spec(value: serde_json::Value) -> TriggerSpec {
        serde_json::from_value(value).unwrap()
    }

    fn in_a_day() -> TriggerSpec {
        TriggerSpec::Date {
            run_date: Utc::now() + ChronoDuration::days(1),
        }
    }

    #[test]
    fn add_generates_an_id_when_missing() {
        let s = scheduler();
        let id = s.add_job(NewJob::new("noop", in_a_day()), None).unwrap();
        assert!(!id.is_empty());
        let info = s.get_job(&id).unwrap().unwrap();
        assert_eq!(info.store, MEMORY_STORE);
        assert_eq!(info.name, "noop");
    }

    #[test]
    fn add_with_taken_id_conflicts_across_stores() {
        let s = scheduler();
        s.add_store(
            "durable",
            Box::new(SqliteJobStore::new(Connection::open_in_memory().unwrap(), "durable").unwrap()),
        );
        s.add_job(NewJob::new("noop", in_a_day()).id("t1"), Some("durable"))
            .unwrap();
        let err = s
            .add_job(NewJob::new("noop", in_a_day()).id("t1"), None)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ConflictingId { .. }));
    }

    #[test]
    fn add_to_unknown_store_fails() {
        let err = scheduler()
            .add_job(NewJob::new("noop", in_a_day()), Some("nowhere"))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownStore(_)));
    }

    #[test]
    fn mutations_on_missing_jobs_are_not_found() {
        let s = scheduler();
        assert!(s.remove_job("nope", None).unwrap_err().is_not_found());
        assert!(s.pause_job("nope", None).unwrap_err().is_not_found());
        assert!(s.resume_job("nope", None).unwrap_err().is_not_found());
        assert!(s
            .reschedule_job("nope", None, in_a_day())
            .unwrap_err()
            .is_not_found());
        assert!(s
            .modify_job("nope", None, JobChanges::default())
            .unwrap_err()
            .is_not_found());
        assert!(s.get_job("nope").unwrap().is_none());
    }

    #[test]
    fn reschedule_replaces_trigger() {
        let s = scheduler();
        let id = s.add_job(NewJob::new("noop", in_a_day()).id("t"), None).unwrap();
        s.reschedule_job(&id, None, spec(json!({"trigger": "cron", "hour": "4"})))
            .unwrap();
        let info = s.get_job(&id).unwrap().unwrap();
        assert!(matches!(info.trigger, TriggerSpec::Cron { .. }));
        assert!(info.next_run_time.is_some());
    }

    #[test]
    fn reschedule_to_a_stale_date_removes_the_job() {
        let s = scheduler();
        let id = s.add_job(NewJob::new("noop", in_a_day()).id("t"), None).unwrap();
        let stale = TriggerSpec::Date {
            run_date: Utc::now() - ChronoDuration::hours(1),
        };
        assert_eq!(s.reschedule_job(&id, None, stale).unwrap(), "t");
        assert!(s.get_job(&id).unwrap().is_none());
        assert_eq!(s.job_count(), 0);
    }

    #[test]
    fn modify_changes_only_the_given_fields() {
        let s = scheduler();
        let id = s
            .add_job(NewJob::new("noop", in_a_day()).name("before").args(vec![json!(1)]), None)
            .unwrap();
        let changes = JobChanges {
            name: Some("after".into()),
            ..JobChanges::default()
        };
        s.modify_job(&id, None, changes).unwrap();
        let info = s.get_job(&id).unwrap().unwrap();
        assert_eq!(info.name, "after");
        assert_eq!(info.args, vec![json!(1)]);
    }

    #[test]
    fn pause_and_resume() {
        let s = scheduler();
        let id = s.add_job(NewJob::new("noop", in_a_day()), None).unwrap();
        s.pause_job(&id, None).unwrap();
        assert_eq!(s.get_job(&id).unwrap().unwrap().next_run_time, None);
        s.resume_job(&id, None).unwrap();
        assert!(s.get_job(&id).unwrap().unwrap().next_run_time.is_some());
    }

    #[test]
    fn tick_fires_due_job_and_removes_finished_date_job() {
        let (tx, mut rx) = mpsc::channel(8);
        let s = Scheduler::new(Some(tx), Duration::from_secs(1));
        let now = Utc::now();
        let run_date = now + ChronoDuration::milliseconds(200);
        s.add_job(
            NewJob::new("noop", TriggerSpec::Date { run_date })
                .id("once")
                .args(vec![json!("once")]),
            None,
        )
        .unwrap();

        assert_eq!(s.tick(now), 0);
        assert_eq!(s.tick(run_date + ChronoDuration::milliseconds(100)), 1);
        let fired = rx.try_recv().unwrap();
        assert_eq!(fired.id, "once");
        assert_eq!(fired.scheduled_for, run_date);
        assert_eq!(s.job_count(), 0);
    }

    #[test]
    fn misfired_runs_are_skipped_but_rescheduled() {
        let (tx, mut rx) = mpsc::channel(8);
        let s = Scheduler::new(Some(tx), Duration::from_secs(1));
        let start = Utc::now() + ChronoDuration::seconds(10);
        let trigger = spec(json!({
            "trigger": "interval",
            "seconds": 10,
            "start_date": start.to_rfc3339()
        }));
        let id = s.add_job(NewJob::new("noop", trigger), None).unwrap();

        // Far past the grace period: nothing fires, next run moves forward.
        let late = start + ChronoDuration::seconds(35);
        assert_eq!(s.tick(late), 0);
        assert!(rx.try_recv().is_err());
        let next = s.get_job(&id).unwrap().unwrap().next_run_time.unwrap();
        assert_eq!(next, start + ChronoDuration::seconds(40));

        // Within the grace period: fires once.
        assert_eq!(s.tick(next + ChronoDuration::milliseconds(500)), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn missed_runs_coalesce_into_one_fire() {
        let s = scheduler();
        let start = Utc::now() + ChronoDuration::seconds(5);
        let trigger = spec(json!({
            "trigger": "interval",
            "seconds": 1,
            "start_date": start.to_rfc3339()
        }));
        let id = s.add_job(NewJob::new("noop", trigger), None).unwrap();
        let now = start + ChronoDuration::milliseconds(3500);
        assert_eq!(s.tick(now), 1);
        let next = s.get_job(&id).unwrap().unwrap().next_run_time.unwrap();
        assert_eq!(next, start + ChronoDuration::seconds(4));
    }

    #[test]
    fn get_jobs_filters_by_store() {
        let s = scheduler();
        s.add_store(
            "durable",
            Box::new(SqliteJobStore::new(Connection::open_in_memory().unwrap(), "durable").unwrap()),
        );
        s.add_job(NewJob::new("noop", in_a_day()), None).unwrap();
        s.add_job(NewJob::new("noop", in_a_day()), Some("durable")).unwrap();

        assert_eq!(s.get_jobs(None).unwrap().len(), 2);
        let durable = s.get_jobs(Some("durable")).unwrap();
        assert_eq!(durable.len(), 1);
        assert_eq!(durable[0].store, "durable");
        assert!(s.get_jobs(Some("missing")).is_err());
    }

    #[tokio::test]
    async fn run_loop_stops_on_shutdown() {
        let s = Arc::new(scheduler());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(s.clone().run(Duration::from_millis(10), rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
