use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::envelope::ExceptionPayload;
use crate::params::Params;

pub type HandlerResult = Result<Value, ExceptionPayload>;

type Handler = Box<dyn Fn(Params) -> HandlerResult + Send + Sync>;

/// Explicit name → handler table for everything callable over the endpoint.
///
/// Names that were never registered are answered with "method not found";
/// there is no lookup by reflection.
#[derive(Default)]
pub struct MethodRegistry {
    methods: BTreeMap<String, Handler>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous handler.
    ///
    /// The handler's return value is serialized into the `result` field.
    pub fn register<F, T>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(Params) -> Result<T, ExceptionPayload> + Send + Sync + 'static,
        T: Serialize,
    {
        self.methods.insert(
            name.into(),
            Box::new(move |params| {
                let value = handler(params)?;
                serde_json::to_value(value).map_err(|e| ExceptionPayload::internal(e.to_string()))
            }),
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Invoke `name`; `None` if no such method is registered.
    pub fn call(&self, name: &str, params: Params) -> Option<HandlerResult> {
        self.methods.get(name).map(|handler| handler(params))
    }
}
