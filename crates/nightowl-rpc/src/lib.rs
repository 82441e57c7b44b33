//! `nightowl-rpc`: the request/response protocol between the scheduler
//! service and its clients.
//!
//! One HTTP endpoint (`POST /`) accepts a JSON envelope
//! `{version, method, params, id}`. `params` is a mapping whose reserved key
//! `_` carries positional arguments; every other key is a named argument.
//!
//! | Condition                        | Code     |
//! |----------------------------------|----------|
//! | body is not JSON                 | `-32700` |
//! | missing / invalid `id`           | `-32600` |
//! | method not registered            | `-32601` |
//! | handler returned an exception    | `-32600` + marshaled exception |
//!
//! Exceptions travel as `{module_path, type_name, args}` and are rebuilt on
//! the client through an [`ExceptionRegistry`]; unknown types come back as a
//! [`GenericException`] carrying the original args.

pub mod client;
pub mod envelope;
pub mod error;
pub mod exception;
pub mod params;
pub mod registry;
pub mod server;

pub use client::RpcClient;
pub use envelope::{ErrorObject, ExceptionPayload, Request, Response, ResponseBody};
pub use error::{RemoteError, Result, RpcError};
pub use exception::{ExceptionRegistry, GenericException, RemoteException};
pub use params::{ParamError, Params};
pub use registry::{HandlerResult, MethodRegistry};
