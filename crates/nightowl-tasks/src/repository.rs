use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::init_db;
use crate::error::Result;
use crate::types::{LogLevel, Task, TaskLog, TaskResult, TaskResultStatus, TaskStatus};

/// Persistence for tasks, their results and result logs.
///
/// Execution bookkeeping (`status`, `last_result`, `last_ran_*`) is written
/// only by [`begin_run`](TaskRepository::begin_run) and
/// [`mark_pending`](TaskRepository::mark_pending); [`save_task`](TaskRepository::save_task)
/// leaves those columns alone on existing rows so an edit cannot clobber a
/// run in flight.
pub trait TaskRepository: Send + Sync {
    /// Insert or update a task's definition-controlled fields.
    fn save_task(&self, task: &Task) -> Result<()>;

    fn get_task(&self, id: Uuid) -> Result<Option<Task>>;

    /// Returns `false` if there was no such task.
    fn delete_task(&self, id: Uuid) -> Result<bool>;

    fn list_tasks(&self) -> Result<Vec<Task>>;

    fn list_active(&self) -> Result<Vec<Task>>;

    /// Atomically flip the task from `Pending` to `Running`, create its new
    /// result and link it as `last_result`. `None` if the task was not
    /// `Pending`.
    fn begin_run(&self, task_id: Uuid, actor: &str, at: DateTime<Utc>) -> Result<Option<TaskResult>>;

    fn mark_pending(&self, task_id: Uuid) -> Result<()>;

    /// Push one log entry onto a result.
    fn append_log(&self, result_id: Uuid, level: LogLevel, message: &str) -> Result<()>;

    /// Move a `Running` result to a terminal status and stamp `ended_at`.
    /// Returns `false` (and changes nothing) if it was already terminal.
    fn finish_result(
        &self,
        result_id: Uuid,
        status: TaskResultStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// One result with its logs in append order.
    fn get_result(&self, id: Uuid) -> Result<Option<TaskResult>>;

    /// Results of a task, newest first, without logs.
    fn list_results(&self, task_id: Uuid, limit: usize) -> Result<Vec<TaskResult>>;
}

/// [`TaskRepository`] on a single SQLite connection behind a `Mutex`.
pub struct SqliteTaskRepository {
    db: Mutex<Connection>,
}

impl SqliteTaskRepository {
    /// Wrap `conn`, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

const SELECT_TASK: &str = "SELECT id, name, descr, definition, trigger, target, params, active,
                                  status, last_result, last_activated_at, last_activated_by,
                                  last_ran_at, last_ran_by, created_at, updated_at
                           FROM tasks";

const SELECT_RESULT: &str = "SELECT id, task_id, status, ran_by, ran_at, ended_at
                             FROM task_results";

impl TaskRepository for SqliteTaskRepository {
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    fn save_task(&self, task: &Task) -> Result<()> {
        let db = self.lock();
        db.execute(
            "INSERT INTO tasks
             (id, name, descr, definition, trigger, target, params, active, status,
              last_result, last_activated_at, last_activated_by, last_ran_at, last_ran_by,
              created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               descr = excluded.descr,
               definition = excluded.definition,
               trigger = excluded.trigger,
               target = excluded.target,
               params = excluded.params,
               active = excluded.active,
               last_activated_at = excluded.last_activated_at,
               last_activated_by = excluded.last_activated_by,
               updated_at = excluded.updated_at",
            params![
                task.id.to_string(),
                task.name,
                task.descr,
                task.definition,
                serde_json::to_string(&task.trigger)?,
                serde_json::to_string(&task.target)?,
                serde_json::to_string(&task.params)?,
                task.active,
                task.status.as_str(),
                task.last_result.map(|id| id.to_string()),
                task.last_activated_at.map(to_sql_time),
                task.last_activated_by,
                task.last_ran_at.map(to_sql_time),
                task.last_ran_by,
                to_sql_time(task.created_at),
                task.updated_at.map(to_sql_time),
            ],
        )?;
        debug!("task saved");
        Ok(())
    }

    #[instrument(skip(self))]
    fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        let db = self.lock();
        let task = db
            .query_row(
                &format!("{SELECT_TASK} WHERE id = ?1"),
                params![id.to_string()],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    #[instrument(skip(self))]
    fn delete_task(&self, id: Uuid) -> Result<bool> {
        let db = self.lock();
        let n = db.execute("DELETE FROM tasks WHERE id = ?1", params![id.to_string()])?;
        Ok(n > 0)
    }

    fn list_tasks(&self) -> Result<Vec<Task>> {
        let db = self.lock();
        let mut stmt = db.prepare(&format!("{SELECT_TASK} ORDER BY created_at"))?;
        let tasks = stmt
            .query_map([], row_to_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    fn list_active(&self) -> Result<Vec<Task>> {
        let db = self.lock();
        let mut stmt = db.prepare(&format!("{SELECT_TASK} WHERE active = 1 ORDER BY created_at"))?;
        let tasks = stmt
            .query_map([], row_to_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    #[instrument(skip(self))]
    fn begin_run(&self, task_id: Uuid, actor: &str, at: DateTime<Utc>) -> Result<Option<TaskResult>> {
        let mut db = self.lock();
        let tx = db.transaction()?;
        let claimed = tx.execute(
            "UPDATE tasks SET status = 'Running', last_ran_by = ?2, last_ran_at = ?3
             WHERE id = ?1 AND status = 'Pending'",
            params![task_id.to_string(), actor, to_sql_time(at)],
        )?;
        if claimed == 0 {
            return Ok(None);
        }

        let result = TaskResult::start(task_id, actor, at);
        tx.execute(
            "INSERT INTO task_results (id, task_id, status, ran_by, ran_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
            params![
                result.id.to_string(),
                task_id.to_string(),
                result.status.code(),
                result.ran_by,
                to_sql_time(result.ran_at),
            ],
        )?;
        tx.execute(
            "UPDATE tasks SET last_result = ?2 WHERE id = ?1",
            params![task_id.to_string(), result.id.to_string()],
        )?;
        tx.commit()?;
        debug!(result_id = %result.id, "run started");
        Ok(Some(result))
    }

    #[instrument(skip(self))]
    fn mark_pending(&self, task_id: Uuid) -> Result<()> {
        let db = self.lock();
        db.execute(
            "UPDATE tasks SET status = 'Pending' WHERE id = ?1",
            params![task_id.to_string()],
        )?;
        Ok(())
    }

    fn append_log(&self, result_id: Uuid, level: LogLevel, message: &str) -> Result<()> {
        let db = self.lock();
        db.execute(
            "INSERT INTO task_logs (result_id, time, message, level) VALUES (?1, ?2, ?3, ?4)",
            params![result_id.to_string(), to_sql_time(Utc::now()), message, level.code()],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn finish_result(
        &self,
        result_id: Uuid,
        status: TaskResultStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let db = self.lock();
        let n = db.execute(
            "UPDATE task_results SET status = ?2, ended_at = ?3
             WHERE id = ?1 AND status = ?4",
            params![
                result_id.to_string(),
                status.code(),
                to_sql_time(at),
                TaskResultStatus::Running.code(),
            ],
        )?;
        Ok(n > 0)
    }

    fn get_result(&self, id: Uuid) -> Result<Option<TaskResult>> {
        let db = self.lock();
        let Some(mut result) = db
            .query_row(
                &format!("{SELECT_RESULT} WHERE id = ?1"),
                params![id.to_string()],
                row_to_result,
            )
            .optional()?
        else {
            return Ok(None);
        };

        let mut stmt = db.prepare_cached(
            "SELECT time, message, level FROM task_logs WHERE result_id = ?1 ORDER BY id",
        )?;
        result.logs = stmt
            .query_map(params![id.to_string()], row_to_log)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Some(result))
    }

    fn list_results(&self, task_id: Uuid, limit: usize) -> Result<Vec<TaskResult>> {
        let db = self.lock();
        let mut stmt = db.prepare(&format!(
            "{SELECT_RESULT} WHERE task_id = ?1 ORDER BY ran_at DESC LIMIT ?2"
        ))?;
        let results = stmt
            .query_map(params![task_id.to_string(), limit as i64], row_to_result)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(results)
    }
}

fn to_sql_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn bad_column<E: std::error::Error + Send + Sync + 'static>(idx: usize) -> impl FnOnce(E) -> rusqlite::Error {
    move |e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(bad_column(idx))
}

fn opt_uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| Uuid::parse_str(&s).map_err(bad_column(idx)))
        .transpose()
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_time(&s, idx)
}

fn opt_time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| parse_time(&s, idx)).transpose()
}

fn parse_time(s: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(bad_column(idx))
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s).map_err(bad_column(idx))
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status: String = row.get(8)?;
    let status = status.parse::<TaskStatus>().map_err(bad_column(8))?;
    Ok(Task {
        id: uuid_col(row, 0)?,
        name: row.get(1)?,
        descr: row.get(2)?,
        definition: row.get(3)?,
        trigger: json_col(row, 4)?,
        target: json_col(row, 5)?,
        params: json_col(row, 6)?,
        active: row.get(7)?,
        status,
        last_result: opt_uuid_col(row, 9)?,
        last_activated_at: opt_time_col(row, 10)?,
        last_activated_by: row.get(11)?,
        last_ran_at: opt_time_col(row, 12)?,
        last_ran_by: row.get(13)?,
        created_at: time_col(row, 14)?,
        updated_at: opt_time_col(row, 15)?,
    })
}

fn row_to_result(row: &Row<'_>) -> rusqlite::Result<TaskResult> {
    let code: i64 = row.get(2)?;
    let status =
        TaskResultStatus::from_code(code).ok_or(rusqlite::Error::IntegralValueOutOfRange(2, code))?;
    Ok(TaskResult {
        id: uuid_col(row, 0)?,
        task_id: uuid_col(row, 1)?,
        status,
        ran_by: row.get(3)?,
        ran_at: time_col(row, 4)?,
        ended_at: opt_time_col(row, 5)?,
        logs: Vec::new(),
    })
}

fn row_to_log(row: &Row<'_>) -> rusqlite::Result<TaskLog> {
    let code: i64 = row.get(2)?;
    Ok(TaskLog {
        time: time_col(row, 0)?,
        message: row.get(1)?,
        level: LogLevel::from_code(code).unwrap_or(LogLevel::Info),
    })
}
