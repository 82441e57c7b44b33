use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use nightowl_core::{RUN_TASK_ENTRY_POINT, SCHEDULER_ACTOR};
use nightowl_scheduler::{NewJob, TriggerKind, TriggerSpec};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::definition::TaskDefinition;
use crate::error::{Result, TaskError};

/// Lifecycle of a task: `Running` only while one execution is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Running => "Running",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Pending" => Ok(TaskStatus::Pending),
            "Running" => Ok(TaskStatus::Running),
            other => Err(TaskError::Definition(format!("unknown task status: {other}"))),
        }
    }
}

/// What a task runs: a single callable, or a module that fans out into
/// units of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Callable(String),
    Module(String),
}

/// A persisted, schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub descr: Option<String>,
    pub trigger: TriggerSpec,
    pub target: Target,
    /// Free-form settings from the definition, handed to the module.
    #[serde(default)]
    pub params: Map<String, Value>,
    pub active: bool,
    pub status: TaskStatus,
    /// The YAML document the task was built from. Never serialized.
    #[serde(skip)]
    pub definition: String,
    pub last_result: Option<Uuid>,
    pub last_activated_at: Option<DateTime<Utc>>,
    pub last_activated_by: Option<String>,
    pub last_ran_at: Option<DateTime<Utc>>,
    pub last_ran_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Task {
    /// A new, active task built from a YAML definition.
    pub fn from_definition(yaml: &str, actor: Option<&str>) -> Result<Self> {
        let definition = TaskDefinition::parse(yaml)?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            name: definition.name,
            descr: definition.descr,
            trigger: definition.trigger,
            target: definition.target,
            params: definition.params,
            active: true,
            status: TaskStatus::Pending,
            definition: yaml.to_string(),
            last_result: None,
            last_activated_at: actor.map(|_| now),
            last_activated_by: actor.map(str::to_string),
            last_ran_at: None,
            last_ran_by: None,
            created_at: now,
            updated_at: None,
        })
    }

    /// Replace everything the definition controls, keeping identity and
    /// run bookkeeping.
    pub fn apply_definition(&mut self, yaml: &str) -> Result<()> {
        let definition = TaskDefinition::parse(yaml)?;
        self.name = definition.name;
        self.descr = definition.descr;
        self.trigger = definition.trigger;
        self.target = definition.target;
        self.params = definition.params;
        self.definition = yaml.to_string();
        Ok(())
    }

    pub fn kind(&self) -> TriggerKind {
        self.trigger.kind()
    }

    /// Whether a scheduler job should exist for this task right now.
    pub fn wants_job(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.trigger.has_elapsed(now)
    }

    /// The job that runs this task by id.
    pub fn job(&self) -> NewJob {
        let id = self.id.to_string();
        NewJob::new(RUN_TASK_ENTRY_POINT, self.trigger.clone())
            .id(id.clone())
            .name(self.name.clone())
            .args(vec![Value::String(id), Value::String(SCHEDULER_ACTOR.to_string())])
    }
}

/// Terminal status of one execution. Codes are the persisted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskResultStatus {
    Running,
    Success,
    ManuallyStopped,
    Failure,
    Exception,
}

impl TaskResultStatus {
    pub fn code(&self) -> i64 {
        match self {
            TaskResultStatus::Running => 0,
            TaskResultStatus::Success => 1,
            TaskResultStatus::ManuallyStopped => -1,
            TaskResultStatus::Failure => -2,
            TaskResultStatus::Exception => -10,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => TaskResultStatus::Running,
            1 => TaskResultStatus::Success,
            -1 => TaskResultStatus::ManuallyStopped,
            -2 => TaskResultStatus::Failure,
            -10 => TaskResultStatus::Exception,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        *self != TaskResultStatus::Running
    }
}

impl fmt::Display for TaskResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskResultStatus::Running => "Running",
            TaskResultStatus::Success => "Success",
            TaskResultStatus::ManuallyStopped => "ManuallyStopped",
            TaskResultStatus::Failure => "Failure",
            TaskResultStatus::Exception => "Exception",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Exception,
}

impl LogLevel {
    pub fn code(&self) -> i64 {
        match self {
            LogLevel::Debug => 0,
            LogLevel::Info => 1,
            LogLevel::Warning => 2,
            LogLevel::Error => 3,
            LogLevel::Exception => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warning,
            3 => LogLevel::Error,
            4 => LogLevel::Exception,
            _ => return None,
        })
    }
}

/// One immutable log line of an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLog {
    pub time: DateTime<Utc>,
    pub message: String,
    pub level: LogLevel,
}

/// One execution attempt of a task.
///
/// `ended_at` is set exactly when `status` is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: Uuid,
    pub task_id: Uuid,
    pub status: TaskResultStatus,
    pub ran_by: String,
    pub ran_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub logs: Vec<TaskLog>,
}

impl TaskResult {
    pub fn start(task_id: Uuid, ran_by: &str, ran_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            status: TaskResultStatus::Running,
            ran_by: ran_by.to_string(),
            ran_at,
            ended_at: None,
            logs: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NIGHTLY: &str = "
name: nightly
trigger: cron
hour: 2
module: echo
params:
  items: [a, b]
";

    #[test]
    fn definition_fills_trigger_and_target() {
        let task = Task::from_definition(NIGHTLY, Some("alice")).unwrap();
        assert_eq!(task.name, "nightly");
        assert_eq!(task.kind(), TriggerKind::Cron);
        assert_eq!(task.target, Target::Module("echo".into()));
        assert_eq!(task.params["items"], serde_json::json!(["a", "b"]));
        assert!(task.active);
        assert_eq!(task.last_activated_by.as_deref(), Some("alice"));
    }

    #[test]
    fn definition_text_is_not_serialized() {
        let task = Task::from_definition(NIGHTLY, None).unwrap();
        let value = serde_json::to_value(&task).unwrap();
        assert!(value.get("definition").is_none());
        assert_eq!(value["status"], serde_json::json!("Pending"));
    }

    #[test]
    fn job_runs_the_task_by_id_as_scheduler() {
        let task = Task::from_definition(NIGHTLY, None).unwrap();
        let job = task.job();
        assert_eq!(job.entry_point, RUN_TASK_ENTRY_POINT);
        assert_eq!(job.id.as_deref(), Some(task.id.to_string().as_str()));
        assert_eq!(job.args[1], serde_json::json!("scheduler"));
    }

    #[test]
    fn elapsed_date_task_wants_no_job() {
        let mut task = Task::from_definition(
            "name: once\ntrigger: date\nrun_date: 2020-01-01T00:00:00Z\ncallable: noop\n",
            None,
        )
        .unwrap();
        assert!(!task.wants_job(Utc::now()));
        task.trigger = TriggerSpec::Date {
            run_date: Utc::now() + chrono::Duration::hours(1),
        };
        assert!(task.wants_job(Utc::now()));
        task.active = false;
        assert!(!task.wants_job(Utc::now()));
    }

    #[test]
    fn result_status_codes_round_trip() {
        for status in [
            TaskResultStatus::Running,
            TaskResultStatus::Success,
            TaskResultStatus::ManuallyStopped,
            TaskResultStatus::Failure,
            TaskResultStatus::Exception,
        ] {
            assert_eq!(TaskResultStatus::from_code(status.code()), Some(status));
        }
        assert!(!TaskResultStatus::Running.is_terminal());
    }
}
