use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use serde_json::Value;

use crate::envelope::ExceptionPayload;
use crate::params::ParamError;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// An error type that can be marshaled across the RPC boundary and rebuilt
/// on the other side.
///
/// `MODULE_PATH` + [`type_name`](RemoteException::type_name) identify the
/// type; [`args`](RemoteException::args) are the constructor arguments that
/// [`from_args`](RemoteException::from_args) accepts back.
pub trait RemoteException: StdError + Send + Sync + 'static {
    const MODULE_PATH: &'static str;

    fn type_name(&self) -> &'static str;

    fn args(&self) -> Vec<Value>;

    /// Every type name this error can marshal as.
    fn type_names() -> &'static [&'static str]
    where
        Self: Sized;

    /// Rebuild from marshaled args; `None` if the args do not fit.
    fn from_args(type_name: &str, args: &[Value]) -> Option<Self>
    where
        Self: Sized;

    fn to_payload(&self) -> ExceptionPayload {
        ExceptionPayload::new(Self::MODULE_PATH, self.type_name(), self.args())
    }
}

impl<E: RemoteException> From<E> for ExceptionPayload {
    fn from(err: E) -> Self {
        err.to_payload()
    }
}

/// Stand-in for a remote exception whose type could not be rebuilt locally.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericException {
    pub module_path: String,
    pub type_name: String,
    pub args: Vec<Value>,
}

impl GenericException {
    /// Args rendered as text, strings unquoted.
    pub fn message(&self) -> String {
        self.args
            .iter()
            .map(|a| match a {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for GenericException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}({})", self.module_path, self.type_name, self.message())
    }
}

impl StdError for GenericException {}

impl From<ExceptionPayload> for GenericException {
    fn from(p: ExceptionPayload) -> Self {
        Self {
            module_path: p.module_path,
            type_name: p.type_name,
            args: p.args,
        }
    }
}

type Constructor = Box<dyn Fn(&[Value]) -> Option<BoxError> + Send + Sync>;

/// Maps `(module_path, type_name)` to a constructor for the local error type.
///
/// Populated once at client construction; lookup misses and constructor
/// failures degrade to [`GenericException`].
pub struct ExceptionRegistry {
    constructors: HashMap<(String, String), Constructor>,
}

impl ExceptionRegistry {
    /// A registry that already knows the transport's own [`ParamError`].
    pub fn new() -> Self {
        let mut registry = Self {
            constructors: HashMap::new(),
        };
        registry.register::<ParamError>();
        registry
    }

    pub fn register<E: RemoteException>(&mut self) {
        for &type_name in E::type_names() {
            self.constructors.insert(
                (E::MODULE_PATH.to_string(), type_name.to_string()),
                Box::new(move |args: &[Value]| E::from_args(type_name, args).map(|e| Box::new(e) as BoxError)),
            );
        }
    }

    pub fn is_registered(&self, module_path: &str, type_name: &str) -> bool {
        self.constructors
            .contains_key(&(module_path.to_string(), type_name.to_string()))
    }

    /// Rebuild the error described by `payload`.
    pub fn reconstruct(&self, payload: &ExceptionPayload) -> BoxError {
        let key = (payload.module_path.clone(), payload.type_name.clone());
        self.constructors
            .get(&key)
            .and_then(|construct| construct(&payload.args))
            .unwrap_or_else(|| Box::new(GenericException::from(payload.clone())))
    }
}

impl Default for ExceptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use thiserror::Error;

    #[derive(Debug, Error, PartialEq)]
    enum StoreError {
        #[error("no such key: {0}")]
        Missing(String),
        #[error("store full ({0} entries)")]
        Full(u64),
    }

    impl RemoteException for StoreError {
        const MODULE_PATH: &'static str = "tests::store";

        fn type_name(&self) -> &'static str {
            match self {
                StoreError::Missing(_) => "KeyError",
                StoreError::Full(_) => "FullError",
            }
        }

        fn args(&self) -> Vec<Value> {
            match self {
                StoreError::Missing(k) => vec![json!(k)],
                StoreError::Full(n) => vec![json!(n)],
            }
        }

        fn type_names() -> &'static [&'static str] {
            &["KeyError", "FullError"]
        }

        fn from_args(type_name: &str, args: &[Value]) -> Option<Self> {
            match type_name {
                "KeyError" => Some(StoreError::Missing(args.first()?.as_str()?.to_string())),
                "FullError" => Some(StoreError::Full(args.first()?.as_u64()?)),
                _ => None,
            }
        }
    }

    fn registry() -> ExceptionRegistry {
        let mut r = ExceptionRegistry::new();
        r.register::<StoreError>();
        r
    }

    #[test]
    fn known_type_round_trips_to_the_same_error() {
        let original = StoreError::Missing("job-7".to_string());
        let payload: ExceptionPayload = StoreError::Missing("job-7".to_string()).into();

        let rebuilt = registry().reconstruct(&payload);
        assert_eq!(rebuilt.downcast_ref::<StoreError>(), Some(&original));
        assert_eq!(rebuilt.to_string(), original.to_string());
    }

    #[test]
    fn unknown_type_becomes_generic_with_same_args() {
        let payload = ExceptionPayload::new("elsewhere", "Boom", vec![json!("kaput"), json!(3)]);
        let rebuilt = registry().reconstruct(&payload);

        let generic = rebuilt.downcast_ref::<GenericException>().unwrap();
        assert_eq!(generic.args, payload.args);
        assert_eq!(generic.message(), "kaput, 3");
    }

    #[test]
    fn incompatible_args_fall_back_to_generic() {
        // FullError expects a number.
        let payload = ExceptionPayload::new("tests::store", "FullError", vec![json!("many")]);
        let rebuilt = registry().reconstruct(&payload);

        assert!(rebuilt.downcast_ref::<StoreError>().is_none());
        let generic = rebuilt.downcast_ref::<GenericException>().unwrap();
        assert_eq!(generic.args, vec![json!("many")]);
    }

    #[test]
    fn param_errors_are_known_by_default() {
        let r = ExceptionRegistry::new();
        assert!(r.is_registered("nightowl_rpc::params", "TypeError"));
        let payload: ExceptionPayload = ParamError::Missing("id".to_string()).into();
        let rebuilt = r.reconstruct(&payload);
        assert!(rebuilt.to_string().contains("missing required argument 'id'"));
    }
}
