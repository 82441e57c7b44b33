// Wire format checks for the request/response envelopes.
// These pin the field names clients on the other side of the endpoint rely on.

use nightowl_rpc::envelope::{INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR};
use nightowl_rpc::{ExceptionPayload, Params, Request, Response, ResponseBody};
use serde_json::{json, Value};

#[test]
fn request_carries_version_method_params_and_id() {
    let params = Params::new().arg("job-1").named("store", "default");
    let req = Request::new("get_job", params.into_map(), "abc-123");
    let v = serde_json::to_value(&req).unwrap();

    assert_eq!(v["version"], "2.0");
    assert_eq!(v["method"], "get_job");
    assert_eq!(v["params"]["_"], json!(["job-1"]));
    assert_eq!(v["params"]["store"], "default");
    assert_eq!(v["id"], "abc-123");
}

#[test]
fn datetimes_travel_as_iso8601_strings() {
    let at = chrono::DateTime::parse_from_rfc3339("2026-10-20T03:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    let map = Params::new().named("run_date", at).into_map();
    let text = map["run_date"].as_str().unwrap();
    assert!(text.starts_with("2026-10-20T03:00:00"));
}

#[test]
fn success_response_has_result_and_no_error() {
    let res = Response::ok(json!("r-1"), json!({"_id": "job-1"}));
    let json = serde_json::to_string(&res).unwrap();

    assert!(json.contains(r#""version":"2.0""#));
    assert!(json.contains(r#""result":{"_id":"job-1"}"#));
    assert!(!json.contains(r#""error""#));
}

#[test]
fn null_result_still_serializes_the_result_key() {
    let res = Response::ok(json!("r-1"), Value::Null);
    let v = serde_json::to_value(&res).unwrap();
    assert!(v.as_object().unwrap().contains_key("result"));

    let back: Response = serde_json::from_value(v).unwrap();
    assert!(matches!(back.body, ResponseBody::Result { result: Value::Null }));
}

#[test]
fn exception_response_shape() {
    let exc = ExceptionPayload::new("nightowl_scheduler::error", "JobLookupError", vec![json!("job-9")]);
    let res = Response::exception(json!("r-2"), exc);
    let v = serde_json::to_value(&res).unwrap();

    assert_eq!(v["error"]["code"], INVALID_REQUEST);
    assert_eq!(v["error"]["data"]["exception"]["module_path"], "nightowl_scheduler::error");
    assert_eq!(v["error"]["data"]["exception"]["type_name"], "JobLookupError");
    assert_eq!(v["error"]["data"]["exception"]["args"], json!(["job-9"]));
    assert!(v.get("result").is_none());
}

#[test]
fn error_response_parses_back_as_error() {
    let json = r#"{"version":"2.0","error":{"code":-32601,"message":"Method not found"},"id":"r-3"}"#;
    let res: Response = serde_json::from_str(json).unwrap();
    assert_eq!(res.error().unwrap().code, METHOD_NOT_FOUND);
    assert!(res.error().unwrap().data.is_none());
}

#[test]
fn parse_error_has_null_id() {
    let res = Response::err(Value::Null, PARSE_ERROR, "Parse error");
    let v = serde_json::to_value(&res).unwrap();
    assert_eq!(v["id"], Value::Null);
    assert_eq!(v["error"]["code"], -32700);
}
