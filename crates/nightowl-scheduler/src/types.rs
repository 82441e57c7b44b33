use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::trigger::{Trigger, TriggerSpec};

/// A job as held by a job store.
///
/// `next_run_time == None` means the job is paused.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub trigger: Trigger,
    /// Name of the entry point the dispatcher resolves when the job fires.
    pub entry_point: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub next_run_time: Option<DateTime<Utc>>,
}

impl Job {
    pub fn info(&self, store: &str) -> JobInfo {
        JobInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            trigger: self.trigger.spec().clone(),
            next_run_time: self.next_run_time,
            entry_point: self.entry_point.clone(),
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
            store: store.to_string(),
        }
    }
}

/// Read-only projection returned by `get_job` / `get_jobs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub trigger: TriggerSpec,
    pub next_run_time: Option<DateTime<Utc>>,
    pub entry_point: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    pub store: String,
}

/// Everything `add_job` needs. A missing `id` is generated; a missing
/// `name` defaults to the entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub id: Option<String>,
    pub name: Option<String>,
    pub entry_point: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub trigger: TriggerSpec,
}

impl NewJob {
    pub fn new(entry_point: impl Into<String>, trigger: TriggerSpec) -> Self {
        Self {
            id: None,
            name: None,
            entry_point: entry_point.into(),
            args: Vec::new(),
            kwargs: Map::new(),
            trigger,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }
}

/// Fields `modify_job` may change. Unknown keys are refused.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kwargs: Option<Map<String, Value>>,
}

impl JobChanges {
    pub fn apply(self, job: &mut Job) {
        if let Some(name) = self.name {
            job.name = name;
        }
        if let Some(entry_point) = self.entry_point {
            job.entry_point = entry_point;
        }
        if let Some(args) = self.args {
            job.args = args;
        }
        if let Some(kwargs) = self.kwargs {
            job.kwargs = kwargs;
        }
    }
}

/// A job that came due, handed to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct FiredJob {
    pub id: String,
    pub name: String,
    pub entry_point: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub scheduled_for: DateTime<Utc>,
}
