use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{Result, SchedulerError};
use crate::store::JobStore;
use crate::trigger::{Trigger, TriggerSpec};
use crate::types::Job;

/// Initialise the durable job store schema in `conn`.
///
/// Several named stores can share one table; rows are partitioned by
/// `store`. `next_run_time` is fixed-width UTC text so it sorts and compares
/// correctly as a string.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS scheduler_jobs (
            id             TEXT NOT NULL PRIMARY KEY,
            store          TEXT NOT NULL,
            name           TEXT NOT NULL,
            trigger        TEXT NOT NULL,   -- JSON-encoded TriggerSpec
            entry_point    TEXT NOT NULL,
            args           TEXT NOT NULL,   -- JSON array
            kwargs         TEXT NOT NULL,   -- JSON object
            next_run_time  TEXT             -- NULL while paused
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_scheduler_jobs_next_run
            ON scheduler_jobs (store, next_run_time);
        ",
    )?;
    Ok(())
}

pub(crate) fn to_sql_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_sql_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SchedulerError::Storage(format!("bad timestamp '{s}': {e}")))
}

/// Job store persisted to the `scheduler_jobs` table.
pub struct SqliteJobStore {
    conn: Connection,
    store: String,
}

impl SqliteJobStore {
    pub fn new(conn: Connection, store: impl Into<String>) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn,
            store: store.into(),
        })
    }

    fn query(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<Job>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows: Vec<RawJob> = stmt
            .query_map(args, RawJob::from_row)?
            .collect::<rusqlite::Result<_>>()?;
        // A row that no longer decodes is skipped so one bad record does not
        // stall the whole store.
        Ok(rows
            .into_iter()
            .filter_map(|raw| {
                let id = raw.id.clone();
                raw.into_job()
                    .map_err(|e| warn!(job_id = %id, "unreadable job row: {e}"))
                    .ok()
            })
            .collect())
    }
}

struct RawJob {
    id: String,
    name: String,
    trigger: String,
    entry_point: String,
    args: String,
    kwargs: String,
    next_run_time: Option<String>,
}

impl RawJob {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            trigger: row.get(2)?,
            entry_point: row.get(3)?,
            args: row.get(4)?,
            kwargs: row.get(5)?,
            next_run_time: row.get(6)?,
        })
    }

    fn into_job(self) -> Result<Job> {
        let spec: TriggerSpec = serde_json::from_str(&self.trigger)?;
        let args: Vec<Value> = serde_json::from_str(&self.args)?;
        let kwargs: Map<String, Value> = serde_json::from_str(&self.kwargs)?;
        let next_run_time = self.next_run_time.as_deref().map(from_sql_time).transpose()?;
        Ok(Job {
            id: self.id,
            name: self.name,
            trigger: Trigger::new(spec, Utc::now())?,
            entry_point: self.entry_point,
            args,
            kwargs,
            next_run_time,
        })
    }
}

const SELECT_JOB: &str = "SELECT id, name, trigger, entry_point, args, kwargs, next_run_time
                          FROM scheduler_jobs";

impl JobStore for SqliteJobStore {
    fn add(&mut self, job: Job) -> Result<()> {
        let result = self.conn.execute(
            "INSERT INTO scheduler_jobs
             (id, store, name, trigger, entry_point, args, kwargs, next_run_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                job.id,
                self.store,
                job.name,
                serde_json::to_string(job.trigger.spec())?,
                job.entry_point,
                serde_json::to_string(&job.args)?,
                serde_json::to_string(&job.kwargs)?,
                job.next_run_time.map(to_sql_time),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(SchedulerError::ConflictingId { id: job.id })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn update(&mut self, job: Job) -> Result<()> {
        let n = self.conn.execute(
            "UPDATE scheduler_jobs
             SET name = ?3, trigger = ?4, entry_point = ?5, args = ?6, kwargs = ?7,
                 next_run_time = ?8
             WHERE id = ?1 AND store = ?2",
            params![
                job.id,
                self.store,
                job.name,
                serde_json::to_string(job.trigger.spec())?,
                job.entry_point,
                serde_json::to_string(&job.args)?,
                serde_json::to_string(&job.kwargs)?,
                job.next_run_time.map(to_sql_time),
            ],
        )?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id: job.id });
        }
        Ok(())
    }

    fn remove(&mut self, id: &str) -> Result<()> {
        let n = self.conn.execute(
            "DELETE FROM scheduler_jobs WHERE id = ?1 AND store = ?2",
            params![id, self.store],
        )?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Job>> {
        let raw = self
            .conn
            .query_row(
                &format!("{SELECT_JOB} WHERE id = ?1 AND store = ?2"),
                params![id, self.store],
                RawJob::from_row,
            )
            .optional()?;
        raw.map(RawJob::into_job).transpose()
    }

    fn all(&self) -> Result<Vec<Job>> {
        self.query(
            &format!("{SELECT_JOB} WHERE store = ?1 ORDER BY next_run_time"),
            params![self.store],
        )
    }

    fn due(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        self.query(
            &format!(
                "{SELECT_JOB} WHERE store = ?1 AND next_run_time IS NOT NULL
                 AND next_run_time <= ?2 ORDER BY next_run_time"
            ),
            params![self.store, to_sql_time(now)],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn store() -> SqliteJobStore {
        SqliteJobStore::new(Connection::open_in_memory().unwrap(), "durable").unwrap()
    }

    fn job(id: &str, next: Option<DateTime<Utc>>) -> Job {
        let now = Utc::now();
        let spec: TriggerSpec =
            serde_json::from_value(json!({"trigger": "cron", "minute": "*/5"})).unwrap();
        Job {
            id: id.to_string(),
            name: format!("job {id}"),
            trigger: Trigger::new(spec, now).unwrap(),
            entry_point: "nightowl_worker::run_task".to_string(),
            args: vec![json!(id), json!("scheduler")],
            kwargs: Map::new(),
            next_run_time: next,
        }
    }

    #[test]
    fn stored_job_reads_back_intact() {
        let mut s = store();
        let next = Utc::now() + Duration::minutes(3);
        s.add(job("t1", Some(next))).unwrap();

        let back = s.get("t1").unwrap().unwrap();
        assert_eq!(back.name, "job t1");
        assert_eq!(back.args, vec![json!("t1"), json!("scheduler")]);
        assert_eq!(back.trigger.spec(), job("t1", None).trigger.spec());
        assert_eq!(
            back.next_run_time.map(to_sql_time),
            Some(to_sql_time(next))
        );
    }

    #[test]
    fn duplicate_insert_is_a_conflict() {
        let mut s = store();
        s.add(job("t1", None)).unwrap();
        let err = s.add(job("t1", None)).unwrap_err();
        assert!(matches!(err, SchedulerError::ConflictingId { .. }));
    }

    #[test]
    fn due_orders_by_next_run_and_skips_paused() {
        let mut s = store();
        let now = Utc::now();
        s.add(job("b", Some(now - Duration::seconds(1)))).unwrap();
        s.add(job("a", Some(now - Duration::seconds(30)))).unwrap();
        s.add(job("p", None)).unwrap();
        s.add(job("f", Some(now + Duration::hours(1)))).unwrap();

        let ids: Vec<_> = s.due(now).unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn stores_sharing_a_table_stay_separate() {
        let dir = std::env::temp_dir().join(format!("nightowl-jobs-{}", uuid::Uuid::new_v4()));
        let mut one = SqliteJobStore::new(Connection::open(&dir).unwrap(), "one").unwrap();
        let two = SqliteJobStore::new(Connection::open(&dir).unwrap(), "two").unwrap();

        one.add(job("j", None)).unwrap();
        assert!(two.get("j").unwrap().is_none());
        assert_eq!(one.all().unwrap().len(), 1);
        let _ = std::fs::remove_file(&dir);
    }

    #[test]
    fn update_missing_job_is_not_found() {
        let mut s = store();
        assert!(s.update(job("ghost", None)).unwrap_err().is_not_found());
        assert!(s.remove("ghost").unwrap_err().is_not_found());
    }
}
