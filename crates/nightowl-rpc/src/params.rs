use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::exception::RemoteException;

/// Reserved `params` key carrying positional arguments.
pub const POSITIONAL_KEY: &str = "_";

/// Argument binding failures on the server side.
#[derive(Debug, Error, PartialEq)]
pub enum ParamError {
    #[error("'{0}' must be a list of positional arguments")]
    Positional(String),

    #[error("missing required argument '{0}'")]
    Missing(String),

    #[error("got multiple values for argument '{0}'")]
    Duplicate(String),

    #[error("invalid value for argument '{name}': {reason}")]
    Invalid { name: String, reason: String },

    /// A binding failure rebuilt from the wire; only the message survives.
    #[error("{0}")]
    Other(String),
}

impl RemoteException for ParamError {
    const MODULE_PATH: &'static str = "nightowl_rpc::params";

    fn type_name(&self) -> &'static str {
        "TypeError"
    }

    fn args(&self) -> Vec<Value> {
        vec![Value::String(self.to_string())]
    }

    fn type_names() -> &'static [&'static str] {
        &["TypeError"]
    }

    fn from_args(_type_name: &str, args: &[Value]) -> Option<Self> {
        let message = args.first()?.as_str()?;
        Some(ParamError::Other(message.to_string()))
    }
}

/// Positional and named arguments of one call.
///
/// Built by clients with [`Params::arg`] / [`Params::named`]; consumed by
/// handlers with [`Params::take`] / [`Params::take_opt`], which accept an
/// argument either at its positional index or under its name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    positional: Vec<Option<Value>>,
    named: Map<String, Value>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Serialize) -> Self {
        self.positional.push(Some(to_value(value)));
        self
    }

    /// Set a named argument. `Option::None` is sent as JSON `null`.
    pub fn named(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        self.named.insert(key.into(), to_value(value));
        self
    }

    /// Merge every field of a serializable struct in as named arguments.
    /// Non-object values are ignored.
    pub fn extend_named(mut self, value: impl Serialize) -> Self {
        if let Value::Object(map) = to_value(value) {
            self.named.extend(map);
        }
        self
    }

    /// Split a wire `params` mapping into positional and named parts.
    pub fn from_map(mut map: Map<String, Value>) -> Result<Self, ParamError> {
        let positional = match map.remove(POSITIONAL_KEY) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.into_iter().map(Some).collect(),
            Some(_) => return Err(ParamError::Positional(POSITIONAL_KEY.to_string())),
        };
        Ok(Self {
            positional,
            named: map,
        })
    }

    /// Wire form: named keys plus `_` when there are positional arguments.
    pub fn into_map(self) -> Map<String, Value> {
        let mut map = self.named;
        if !self.positional.is_empty() {
            let items = self
                .positional
                .into_iter()
                .map(|v| v.unwrap_or(Value::Null))
                .collect();
            map.insert(POSITIONAL_KEY.to_string(), Value::Array(items));
        }
        map
    }

    /// Take a required argument.
    pub fn take<T: DeserializeOwned>(&mut self, index: usize, name: &str) -> Result<T, ParamError> {
        self.take_opt(index, name)?
            .ok_or_else(|| ParamError::Missing(name.to_string()))
    }

    /// Take an optional argument; absent and `null` both yield `None`.
    pub fn take_opt<T: DeserializeOwned>(
        &mut self,
        index: usize,
        name: &str,
    ) -> Result<Option<T>, ParamError> {
        let by_position = self.positional.get_mut(index).and_then(Option::take);
        let by_name = self.named.remove(name);
        let raw = match (by_position, by_name) {
            (Some(_), Some(_)) => return Err(ParamError::Duplicate(name.to_string())),
            (Some(v), None) | (None, Some(v)) => v,
            (None, None) => return Ok(None),
        };
        if raw.is_null() {
            return Ok(None);
        }
        serde_json::from_value(raw)
            .map(Some)
            .map_err(|e| ParamError::Invalid {
                name: name.to_string(),
                reason: e.to_string(),
            })
    }

    /// Take an optional keyword-only argument.
    pub fn take_kw<T: DeserializeOwned>(&mut self, name: &str) -> Result<Option<T>, ParamError> {
        self.take_opt(usize::MAX, name)
    }

    /// Named arguments that no `take` consumed.
    pub fn into_named(self) -> Map<String, Value> {
        self.named
    }

    /// Deserialize the remaining named arguments as one structure.
    pub fn rest_as<T: DeserializeOwned>(self, name: &str) -> Result<T, ParamError> {
        serde_json::from_value(Value::Object(self.named)).map_err(|e| ParamError::Invalid {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }
}

fn to_value(value: impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
