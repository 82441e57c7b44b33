//! Capability traits for executable code and the registry that resolves them
//! by name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use nightowl_tasks::{Context, LogLevel, TaskRepository};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;

/// One invocation inside a module's fan-out batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitOfWork {
    pub plugin: String,
    pub operation: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl UnitOfWork {
    pub fn new(plugin: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            operation: operation.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    pub fn arg(mut self, value: Value) -> Self {
        self.args.push(value);
        self
    }
}

impl fmt::Display for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.plugin, self.operation)
    }
}

/// Handle for appending log entries to one execution's result.
///
/// Every append is mirrored by a `tracing` event. A failed append is
/// reported through `tracing` only; it never fails the caller.
#[derive(Clone)]
pub struct ResultLog {
    repo: Arc<dyn TaskRepository>,
    result_id: Uuid,
}

impl ResultLog {
    pub fn new(repo: Arc<dyn TaskRepository>, result_id: Uuid) -> Self {
        Self { repo, result_id }
    }

    pub fn result_id(&self) -> Uuid {
        self.result_id
    }

    pub fn log(&self, level: LogLevel, message: impl AsRef<str>) {
        let message = message.as_ref();
        let result_id = self.result_id;
        match level {
            LogLevel::Debug => debug!(%result_id, "{message}"),
            LogLevel::Info => info!(%result_id, "{message}"),
            LogLevel::Warning => warn!(%result_id, "{message}"),
            LogLevel::Error | LogLevel::Exception => error!(%result_id, "{message}"),
        }
        if let Err(e) = self.repo.append_log(result_id, level, message) {
            warn!(%result_id, "failed to append task log: {e}");
        }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Info, message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Error, message);
    }

    pub fn exception(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Exception, message);
    }
}

/// An object exposing named operations, invoked by units of work.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Run `operation`. Unknown operations must return
    /// [`PluginError::UnknownOperation`](crate::PluginError::UnknownOperation).
    async fn call(
        &self,
        operation: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        ctx: Context,
        log: &ResultLog,
    ) -> Result<Value>;
}

/// A pipeline that splits a task into independent units of work.
#[async_trait]
pub trait Module: Send + Sync {
    /// `params` is the task definition's `params` mapping.
    async fn main(&self, ctx: &Context, params: &Map<String, Value>) -> Result<Vec<UnitOfWork>>;
}

/// A single function run in place of a module.
#[async_trait]
pub trait Callable: Send + Sync {
    async fn call(&self, ctx: Context, log: &ResultLog) -> Result<Value>;
}

/// Name-keyed plugins, modules and callables. Filled once at process start.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
    modules: HashMap<String, Arc<dyn Module>>,
    callables: HashMap<String, Arc<dyn Callable>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_plugin(&mut self, name: impl Into<String>, plugin: impl Plugin + 'static) {
        self.plugins.insert(name.into(), Arc::new(plugin));
    }

    pub fn register_module(&mut self, name: impl Into<String>, module: impl Module + 'static) {
        self.modules.insert(name.into(), Arc::new(module));
    }

    pub fn register_callable(&mut self, name: impl Into<String>, callable: impl Callable + 'static) {
        self.callables.insert(name.into(), Arc::new(callable));
    }

    pub fn plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(name).cloned()
    }

    pub fn module(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.get(name).cloned()
    }

    pub fn callable(&self, name: &str) -> Option<Arc<dyn Callable>> {
        self.callables.get(name).cloned()
    }
}
