//! Units of work shipped with every worker.

use async_trait::async_trait;
use nightowl_tasks::Context;
use serde_json::{Map, Value};

use crate::error::{PluginError, Result};
use crate::plugin::{Callable, Module, Plugin, PluginRegistry, ResultLog, UnitOfWork};

pub const ECHO: &str = "echo";
pub const NOOP: &str = "noop";

/// Register the `echo` plugin and module and the `noop` callable.
pub fn register_builtins(registry: &mut PluginRegistry) {
    registry.register_plugin(ECHO, EchoPlugin);
    registry.register_module(ECHO, EchoModule);
    registry.register_callable(NOOP, Noop);
}

/// `log`: writes each argument to the result log and returns them.
pub struct EchoPlugin;

#[async_trait]
impl Plugin for EchoPlugin {
    async fn call(
        &self,
        operation: &str,
        args: Vec<Value>,
        _kwargs: Map<String, Value>,
        _ctx: Context,
        log: &ResultLog,
    ) -> Result<Value> {
        match operation {
            "log" => {
                for arg in &args {
                    match arg {
                        Value::String(s) => log.info(s),
                        other => log.info(other.to_string()),
                    }
                }
                Ok(Value::Array(args))
            }
            _ => Err(PluginError::UnknownOperation {
                plugin: ECHO.to_string(),
                operation: operation.to_string(),
            }),
        }
    }
}

/// One `echo` unit per entry of `params.items`.
///
/// `params.operation` overrides the operation name (default `log`).
pub struct EchoModule;

#[async_trait]
impl Module for EchoModule {
    async fn main(&self, _ctx: &Context, params: &Map<String, Value>) -> Result<Vec<UnitOfWork>> {
        let items = match params.get("items") {
            None => return Ok(Vec::new()),
            Some(Value::Array(items)) => items,
            Some(_) => return Err(PluginError::InvalidArguments("params.items must be a list".into())),
        };
        let operation = params.get("operation").and_then(Value::as_str).unwrap_or("log");
        Ok(items
            .iter()
            .map(|item| UnitOfWork::new(ECHO, operation).arg(item.clone()))
            .collect())
    }
}

pub struct Noop;

#[async_trait]
impl Callable for Noop {
    async fn call(&self, _ctx: Context, _log: &ResultLog) -> Result<Value> {
        Ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn echo_module_fans_out_over_items() {
        let params = json!({"items": ["a", 2]}).as_object().cloned().unwrap();
        let units = EchoModule.main(&Context::default(), &params).await.unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[1], UnitOfWork::new("echo", "log").arg(json!(2)));
    }

    #[tokio::test]
    async fn echo_module_rejects_non_list_items() {
        let params = json!({"items": "a"}).as_object().cloned().unwrap();
        let err = EchoModule.main(&Context::default(), &params).await.unwrap_err();
        assert!(matches!(err, PluginError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn missing_items_means_no_units() {
        let units = EchoModule.main(&Context::default(), &Map::new()).await.unwrap();
        assert!(units.is_empty());
    }
}
