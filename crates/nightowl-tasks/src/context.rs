use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, TaskError};

const TASK_KEY: &str = "task";
const RESULT_KEY: &str = "task_result";
const ID_KEY: &str = "_id";

/// Serializable key/value state passed through one execution.
///
/// Holds the ids of the running task and its result plus whatever upstream
/// stages set. Cloning is a deep copy, so each unit of work gets a context
/// its siblings cannot see into.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(Map<String, Value>);

impl Context {
    pub fn for_run(task_id: Uuid, result_id: Uuid) -> Self {
        let mut ctx = Context::default();
        ctx.0.insert(TASK_KEY.into(), id_object(task_id));
        ctx.0.insert(RESULT_KEY.into(), id_object(result_id));
        ctx
    }

    /// Follow `keys` through nested mappings.
    pub fn get_value(&self, keys: &[&str]) -> Option<&Value> {
        let (first, rest) = keys.split_first()?;
        let mut current = self.0.get(*first)?;
        for key in rest {
            current = current.as_object()?.get(*key)?;
        }
        Some(current)
    }

    /// Set the value at `keys`, creating intermediate mappings.
    pub fn set_value(&mut self, keys: &[&str], value: Value) -> Result<()> {
        let Some((last, parents)) = keys.split_last() else {
            return Err(TaskError::ContextPath("at least one key is required".into()));
        };
        let mut current = &mut self.0;
        for key in parents {
            let slot = current
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            current = slot
                .as_object_mut()
                .ok_or_else(|| TaskError::ContextPath(format!("'{key}' is not a mapping")))?;
        }
        current.insert(last.to_string(), value);
        Ok(())
    }

    pub fn task_id(&self) -> Option<Uuid> {
        self.id_at(TASK_KEY)
    }

    pub fn result_id(&self) -> Option<Uuid> {
        self.id_at(RESULT_KEY)
    }

    fn id_at(&self, key: &str) -> Option<Uuid> {
        self.get_value(&[key, ID_KEY])?.as_str()?.parse().ok()
    }
}

fn id_object(id: Uuid) -> Value {
    let mut map = Map::new();
    map.insert(ID_KEY.into(), Value::String(id.to_string()));
    Value::Object(map)
}
