use std::sync::Arc;

use axum::{body::Bytes, extract::State, routing::post, Json, Router};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::envelope::{Response, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR};
use crate::params::Params;
use crate::registry::MethodRegistry;

/// Router exposing `registry` on `POST /`.
pub fn router(registry: Arc<MethodRegistry>) -> Router {
    Router::new()
        .route("/", post(receive))
        .with_state(registry)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// POST /: always answers 200 with an envelope; failures live in `error`.
async fn receive(State(registry): State<Arc<MethodRegistry>>, body: Bytes) -> Json<Response> {
    Json(dispatch(&registry, &body))
}

/// Decode one request body, run the method, and build the response envelope.
///
/// Requests without a usable `id` are refused before method lookup, so
/// notifications never execute anything.
pub fn dispatch(registry: &MethodRegistry, body: &[u8]) -> Response {
    let request: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "rpc body is not JSON");
            return Response::err(Value::Null, PARSE_ERROR, "Parse error");
        }
    };

    let Value::Object(mut request) = request else {
        return Response::err(Value::Null, INVALID_REQUEST, "Invalid Request");
    };

    let id = match request.remove("id") {
        Some(id) if is_usable_id(&id) => id,
        _ => {
            warn!("rpc request without id refused");
            return Response::err(Value::Null, INVALID_REQUEST, "Invalid Request");
        }
    };

    let method = match request.remove("method") {
        Some(Value::String(m)) if registry.contains(&m) => m,
        other => {
            let name = other.as_ref().and_then(Value::as_str).unwrap_or_default();
            warn!(method = %name, "rpc method not found");
            return Response::err(id, METHOD_NOT_FOUND, "Method not found");
        }
    };

    let params = match request.remove("params") {
        None | Some(Value::Null) => Ok(Params::new()),
        Some(Value::Object(map)) => Params::from_map(map),
        Some(_) => {
            return Response::err(id, INVALID_REQUEST, "Invalid Request");
        }
    };
    let params = match params {
        Ok(p) => p,
        Err(e) => return Response::exception(id, e.into()),
    };

    debug!(method = %method, id = %id, "rpc call");
    match registry.call(&method, params) {
        Some(Ok(result)) => Response::ok(id, result),
        Some(Err(exception)) => {
            info!(
                method = %method,
                exception = %exception.type_name,
                "rpc method raised"
            );
            Response::exception(id, exception)
        }
        // Checked above; unreachable unless the registry changed underneath.
        None => Response::err(id, METHOD_NOT_FOUND, "Method not found"),
    }
}

fn is_usable_id(id: &Value) -> bool {
    match id {
        Value::String(s) => !s.is_empty(),
        Value::Number(_) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{ExceptionPayload, ResponseBody};
    use crate::params::ParamError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry(calls: Arc<AtomicUsize>) -> MethodRegistry {
        let mut r = MethodRegistry::new();
        r.register("echo", move |mut p: Params| {
            calls.fetch_add(1, Ordering::SeqCst);
            let text: String = p.take(0, "text")?;
            Ok::<_, ExceptionPayload>(text)
        });
        r.register("fail", |_p: Params| {
            Err::<(), _>(ExceptionPayload::new("elsewhere", "Boom", vec![json!("kaput")]))
        });
        r
    }

    fn code(res: &Response) -> i64 {
        res.error().map(|e| e.code).unwrap_or_default()
    }

    #[test]
    fn request_without_id_is_refused_and_not_executed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let r = registry(calls.clone());
        let res = dispatch(&r, br#"{"version":"2.0","method":"echo","params":{"_":["hi"]}}"#);

        assert_eq!(code(&res), INVALID_REQUEST);
        assert_eq!(res.id, Value::Null);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_id_counts_as_missing() {
        let r = registry(Arc::new(AtomicUsize::new(0)));
        let res = dispatch(&r, br#"{"version":"2.0","method":"echo","id":""}"#);
        assert_eq!(code(&res), INVALID_REQUEST);
    }

    #[test]
    fn garbage_body_is_a_parse_error() {
        let r = registry(Arc::new(AtomicUsize::new(0)));
        let res = dispatch(&r, b"{not json");
        assert_eq!(code(&res), PARSE_ERROR);
    }

    #[test]
    fn unknown_method_keeps_the_request_id() {
        let r = registry(Arc::new(AtomicUsize::new(0)));
        let res = dispatch(&r, br#"{"version":"2.0","method":"__init__","id":"r-1"}"#);
        assert_eq!(code(&res), METHOD_NOT_FOUND);
        assert_eq!(res.id, json!("r-1"));
    }

    #[test]
    fn successful_call_returns_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let r = registry(calls.clone());
        let res = dispatch(
            &r,
            br#"{"version":"2.0","method":"echo","params":{"text":"hi"},"id":"r-2"}"#,
        );
        match res.body {
            ResponseBody::Result { result } => assert_eq!(result, json!("hi")),
            ResponseBody::Error { error } => panic!("unexpected error: {error:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn raised_exception_is_marshaled_under_invalid_request() {
        let r = registry(Arc::new(AtomicUsize::new(0)));
        let res = dispatch(&r, br#"{"version":"2.0","method":"fail","id":"r-3"}"#);
        let error = res.error().unwrap();
        assert_eq!(error.code, INVALID_REQUEST);
        let exception = &error.data.as_ref().unwrap().exception;
        assert_eq!(exception.type_name, "Boom");
        assert_eq!(exception.args, vec![json!("kaput")]);
    }

    #[test]
    fn binding_failure_is_marshaled_as_type_error() {
        let r = registry(Arc::new(AtomicUsize::new(0)));
        let res = dispatch(&r, br#"{"version":"2.0","method":"echo","id":"r-4"}"#);
        let exception = &res.error().unwrap().data.as_ref().unwrap().exception;
        assert_eq!(exception.type_name, "TypeError");
        assert_eq!(
            exception.args,
            vec![json!(ParamError::Missing("text".into()).to_string())]
        );
    }
}
