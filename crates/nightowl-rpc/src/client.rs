use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::envelope::{Request, Response, ResponseBody};
use crate::error::{RemoteError, Result, RpcError};
use crate::exception::ExceptionRegistry;
use crate::params::Params;

/// Client for one RPC endpoint.
///
/// Constructed explicitly with its endpoint and time limits and passed to
/// whoever needs it; an unreachable server fails within `timeout` instead of
/// hanging the caller.
pub struct RpcClient {
    http: reqwest::Client,
    url: String,
    exceptions: ExceptionRegistry,
}

impl RpcClient {
    pub fn new(
        url: impl Into<String>,
        timeout: Duration,
        connect_timeout: Duration,
        exceptions: ExceptionRegistry,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
            exceptions,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one request and return its `result`.
    ///
    /// Remote exceptions come back as [`RpcError::Remote`] holding the
    /// locally rebuilt error.
    pub async fn call(&self, method: &str, params: Params) -> Result<Value> {
        let id = Uuid::new_v4().to_string();
        let request = Request::new(method, params.into_map(), id.clone());
        debug!(method, id = %id, url = %self.url, "rpc send");

        let response = self
            .http
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&request)
            .send()
            .await?;
        let bytes = response.bytes().await?;
        let response: Response =
            serde_json::from_slice(&bytes).map_err(|e| RpcError::Decode(e.to_string()))?;

        if !response.id.is_null() && response.id != Value::String(id.clone()) {
            return Err(RpcError::IdMismatch {
                expected: id,
                got: response.id.to_string(),
            });
        }

        match response.body {
            ResponseBody::Result { result } => Ok(result),
            ResponseBody::Error { error } => match error.data {
                Some(data) => {
                    let source = self.exceptions.reconstruct(&data.exception);
                    warn!(
                        method,
                        exception = %data.exception.type_name,
                        "rpc call raised remotely"
                    );
                    Err(RpcError::Remote(RemoteError::new(data.exception, source)))
                }
                None => Err(RpcError::Protocol {
                    code: error.code,
                    message: error.message,
                }),
            },
        }
    }

    /// [`call`](Self::call) and deserialize the result.
    pub async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Params) -> Result<T> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| RpcError::Decode(e.to_string()))
    }
}
