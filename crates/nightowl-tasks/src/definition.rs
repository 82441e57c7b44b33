use nightowl_scheduler::TriggerSpec;
use serde_json::{Map, Value};

use crate::error::{Result, TaskError};
use crate::types::Target;

/// The fields a YAML task definition controls.
///
/// ```yaml
/// name: nightly-report
/// descr: optional free text
/// trigger: cron          # date | interval | cron
/// hour: 2                # trigger fields for the chosen kind
/// module: echo           # or `callable: noop`, exactly one
/// params:                # optional, passed to the module
///   items: [a, b]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDefinition {
    pub name: String,
    pub descr: Option<String>,
    pub target: Target,
    pub params: Map<String, Value>,
    pub trigger: TriggerSpec,
}

impl TaskDefinition {
    pub fn parse(yaml: &str) -> Result<Self> {
        let doc: Value = serde_yaml::from_str(yaml).map_err(|e| invalid(e.to_string()))?;
        let Value::Object(mut doc) = doc else {
            return Err(invalid("definition must be a mapping"));
        };

        let name = take_string(&mut doc, "name")?.ok_or_else(|| invalid("missing 'name'"))?;
        let descr = take_string(&mut doc, "descr")?;
        let target = match (
            take_string(&mut doc, "callable")?,
            take_string(&mut doc, "module")?,
        ) {
            (Some(callable), None) => Target::Callable(callable),
            (None, Some(module)) => Target::Module(module),
            (Some(_), Some(_)) => return Err(invalid("give either 'callable' or 'module', not both")),
            (None, None) => return Err(invalid("missing 'callable' or 'module'")),
        };
        let params = match doc.remove("params") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(params)) => params,
            Some(_) => return Err(invalid("'params' must be a mapping")),
        };

        // What is left is the trigger descriptor.
        if !doc.contains_key("trigger") {
            return Err(invalid("missing 'trigger'"));
        }
        let trigger: TriggerSpec = serde_json::from_value(Value::Object(doc))
            .map_err(|e| invalid(format!("trigger: {e}")))?;

        Ok(Self {
            name,
            descr,
            target,
            params,
            trigger,
        })
    }
}

fn take_string(doc: &mut Map<String, Value>, key: &str) -> Result<Option<String>> {
    match doc.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s)),
        Some(_) => Err(invalid(format!("'{key}' must be a non-empty string"))),
    }
}

fn invalid(msg: impl Into<String>) -> TaskError {
    TaskError::Definition(msg.into())
}
