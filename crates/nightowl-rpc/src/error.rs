use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::envelope::ExceptionPayload;
use crate::exception::BoxError;

/// Client-side failure of one RPC call.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Connection refused, timeout, or any other HTTP-level failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with something that is not a response envelope.
    #[error("malformed response: {0}")]
    Decode(String),

    /// Transport-level error reported by the server (parse, id, method).
    #[error("rpc error {code}: {message}")]
    Protocol { code: i64, message: String },

    #[error("response id {got} does not match request id {expected}")]
    IdMismatch { expected: String, got: String },

    /// The remote method raised; see [`RemoteError`].
    #[error("remote exception: {0}")]
    Remote(RemoteError),
}

impl RpcError {
    /// The rebuilt remote exception, if it is an `E`.
    pub fn remote_as<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            RpcError::Remote(r) => r.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// A remote exception rebuilt on this side of the wire.
///
/// `source` is the reconstructed local error, or a
/// [`GenericException`](crate::GenericException) when the type was unknown.
/// The original payload is always kept.
#[derive(Debug)]
pub struct RemoteError {
    pub payload: ExceptionPayload,
    source: BoxError,
}

impl RemoteError {
    pub fn new(payload: ExceptionPayload, source: BoxError) -> Self {
        Self { payload, source }
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.source.downcast_ref::<E>()
    }

    /// Take the rebuilt error out by value, or get `self` back.
    pub fn downcast<E: StdError + 'static>(self) -> std::result::Result<E, Self> {
        let payload = self.payload;
        match self.source.downcast::<E>() {
            Ok(e) => Ok(*e),
            Err(source) => Err(Self { payload, source }),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl StdError for RemoteError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
