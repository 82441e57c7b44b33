use nightowl_core::RPC_VERSION;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Client → Server request.
/// Wire: `{ "version": "2.0", "method": "get_job", "params": {"_": ["abc"]}, "id": "<uuid>" }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub version: String,
    pub method: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    pub id: String,
}

impl Request {
    pub fn new(method: impl Into<String>, params: Map<String, Value>, id: impl Into<String>) -> Self {
        Self {
            version: RPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: id.into(),
        }
    }
}

/// Server → Client response.
/// Wire: `{ "version": "2.0", "result": ..., "id": "<uuid>" }` or
/// `{ "version": "2.0", "error": {...}, "id": "<uuid>" | null }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub version: String,
    #[serde(flatten)]
    pub body: ResponseBody,
    pub id: Value,
}

/// Exactly one of `result` / `error`.
///
/// `Error` is listed first: a missing `result` key would otherwise
/// deserialize as `Value::Null` and shadow every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Error { error: ErrorObject },
    Result { result: Value },
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            version: RPC_VERSION.to_string(),
            body: ResponseBody::Result { result },
            id,
        }
    }

    pub fn err(id: Value, code: i64, message: &str) -> Self {
        Self {
            version: RPC_VERSION.to_string(),
            body: ResponseBody::Error {
                error: ErrorObject {
                    code,
                    message: message.to_string(),
                    data: None,
                },
            },
            id,
        }
    }

    pub fn exception(id: Value, exception: ExceptionPayload) -> Self {
        Self {
            version: RPC_VERSION.to_string(),
            body: ResponseBody::Error {
                error: ErrorObject {
                    code: INVALID_REQUEST,
                    message: "Invalid Request".to_string(),
                    data: Some(ErrorData { exception }),
                },
            },
            id,
        }
    }

    pub fn error(&self) -> Option<&ErrorObject> {
        match &self.body {
            ResponseBody::Error { error } => Some(error),
            ResponseBody::Result { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorData {
    pub exception: ExceptionPayload,
}

/// Enough information to rebuild an error on the other side of the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionPayload {
    pub module_path: String,
    pub type_name: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl ExceptionPayload {
    pub fn new(module_path: impl Into<String>, type_name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            module_path: module_path.into(),
            type_name: type_name.into(),
            args,
        }
    }

    /// A server-side failure with no more specific type.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            module_path!(),
            "InternalError",
            vec![Value::String(message.into())],
        )
    }
}
