//! JSON-RPC 2.0 message shapes: classification, parameters, construction.

use serde_json::{json, Map, Value};

/// Reserved error codes used on the wire.
pub mod codes {
    /// The incoming text was not valid JSON.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON was valid but not a request or response.
    pub const INVALID_REQUEST: i64 = -32600;
    /// No method registered under the requested name.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Parameter shape or content rejected by the method.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Engine-side failure that is not the caller's fault.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// A method failed in a way it did not recognize (including panics).
    pub const UNCAUGHT_EXCEPTION: i64 = -32000;
    /// A deferred method's task concluded FAILED.
    pub const TASK_FAILED: i64 = -32001;
    /// A deferred method's task concluded CANCELED.
    pub const TASK_CANCELED: i64 = -32002;
}

/// The three legal parameter shapes of a request.
///
/// Any other JSON type in the `params` member is rejected up front with
/// `-32602` rather than handed to the method.
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    None,
    Positional(Vec<Value>),
    Named(Map<String, Value>),
}

impl Params {
    /// Interpret the `params` member of a parsed request. `Err` means the
    /// member was present but not an array or object.
    pub fn from_request(params: Option<&Value>) -> Result<Self, ()> {
        match params {
            None => Ok(Params::None),
            Some(Value::Array(items)) => Ok(Params::Positional(items.clone())),
            Some(Value::Object(map)) => Ok(Params::Named(map.clone())),
            Some(_) => Err(()),
        }
    }

    /// The wire form of these parameters; `None` omits the member.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Params::None => None,
            Params::Positional(items) => Some(Value::Array(items)),
            Params::Named(map) => Some(Value::Object(map)),
        }
    }

    /// Positional arguments, if that is the shape.
    pub fn as_positional(&self) -> Option<&[Value]> {
        match self {
            Params::Positional(items) => Some(items),
            _ => None,
        }
    }

    /// Named arguments, if that is the shape.
    pub fn as_named(&self) -> Option<&Map<String, Value>> {
        match self {
            Params::Named(map) => Some(map),
            _ => None,
        }
    }
}

/// The `id` member of a parsed message, with `null` normalized away:
/// a request with `"id": null` is treated as a notification.
pub fn request_id(message: &Map<String, Value>) -> Option<Value> {
    match message.get("id") {
        None | Some(Value::Null) => None,
        Some(id) => Some(id.clone()),
    }
}

/// A message is a request iff it claims the protocol version and carries a
/// string method name.
pub fn is_request(message: &Map<String, Value>) -> bool {
    version_ok(message) && matches!(message.get("method"), Some(Value::String(_)))
}

/// A message is a response iff it claims the protocol version and carries
/// either a result or an error.
pub fn is_response(message: &Map<String, Value>) -> bool {
    is_success_response(message) || is_error_response(message)
}

pub fn is_success_response(message: &Map<String, Value>) -> bool {
    version_ok(message) && message.contains_key("result")
}

pub fn is_error_response(message: &Map<String, Value>) -> bool {
    version_ok(message) && message.contains_key("error")
}

fn version_ok(message: &Map<String, Value>) -> bool {
    matches!(message.get("jsonrpc"), Some(Value::String(v)) if v == "2.0")
}

pub fn success_response(id: Option<Value>, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id.unwrap_or(Value::Null),
    })
}

pub fn error_response(id: Option<Value>, code: i64, message: &str, data: Option<Value>) -> Value {
    let mut error = Map::new();
    error.insert("code".into(), json!(code));
    error.insert("message".into(), json!(message));
    if let Some(data) = data {
        error.insert("data".into(), data);
    }
    json!({
        "jsonrpc": "2.0",
        "error": error,
        "id": id.unwrap_or(Value::Null),
    })
}

pub fn request(id: i64, method: &str, params: Params) -> Value {
    let mut message = Map::new();
    message.insert("jsonrpc".into(), json!("2.0"));
    message.insert("method".into(), json!(method));
    if let Some(params) = params.into_value() {
        message.insert("params".into(), params);
    }
    message.insert("id".into(), json!(id));
    Value::Object(message)
}

pub fn notification(method: &str, params: Params) -> Value {
    let mut message = Map::new();
    message.insert("jsonrpc".into(), json!("2.0"));
    message.insert("method".into(), json!(method));
    if let Some(params) = params.into_value() {
        message.insert("params".into(), params);
    }
    Value::Object(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn test_request_classification() {
        assert!(is_request(&map(
            json!({"jsonrpc": "2.0", "method": "hello"})
        )));
        assert!(is_request(&map(
            json!({"jsonrpc": "2.0", "method": "hello", "id": 1, "params": []})
        )));
        // Wrong version, missing method, or non-string method.
        assert!(!is_request(&map(json!({"method": "hello"}))));
        assert!(!is_request(&map(json!({"jsonrpc": "1.0", "method": "x"}))));
        assert!(!is_request(&map(json!({"jsonrpc": "2.0", "method": 7}))));
    }

    #[test]
    fn test_response_classification() {
        assert!(is_response(&map(
            json!({"jsonrpc": "2.0", "result": null, "id": 1})
        )));
        assert!(is_response(&map(
            json!({"jsonrpc": "2.0", "error": {"code": -1, "message": "m"}, "id": 1})
        )));
        assert!(!is_response(&map(json!({"jsonrpc": "2.0", "id": 1}))));
        assert!(!is_response(&map(json!({"result": 1, "id": 1}))));
    }

    #[test]
    fn test_null_id_is_notification() {
        assert_eq!(request_id(&map(json!({"id": null}))), None);
        assert_eq!(request_id(&map(json!({}))), None);
        assert_eq!(request_id(&map(json!({"id": 3}))), Some(json!(3)));
        assert_eq!(request_id(&map(json!({"id": "abc"}))), Some(json!("abc")));
    }

    #[test]
    fn test_params_shapes() {
        assert_eq!(Params::from_request(None), Ok(Params::None));
        assert_eq!(
            Params::from_request(Some(&json!([1, 2]))),
            Ok(Params::Positional(vec![json!(1), json!(2)]))
        );
        assert!(matches!(
            Params::from_request(Some(&json!({"a": 1}))),
            Ok(Params::Named(_))
        ));
        assert_eq!(Params::from_request(Some(&json!(5))), Err(()));
        assert_eq!(Params::from_request(Some(&json!("x"))), Err(()));
        assert_eq!(Params::from_request(Some(&json!(null))), Err(()));
    }

    #[test]
    fn test_response_construction() {
        assert_eq!(
            success_response(Some(json!(1)), json!(3)),
            json!({"jsonrpc": "2.0", "result": 3, "id": 1})
        );
        assert_eq!(
            error_response(None, codes::PARSE_ERROR, "parse error", None),
            json!({"jsonrpc": "2.0", "error": {"code": -32700, "message": "parse error"}, "id": null})
        );
        assert_eq!(
            error_response(Some(json!(2)), -1, "m", Some(json!([1]))),
            json!({"jsonrpc": "2.0", "error": {"code": -1, "message": "m", "data": [1]}, "id": 2})
        );
    }

    #[test]
    fn test_request_construction() {
        assert_eq!(
            request(7, "subtract", Params::Positional(vec![json!(42), json!(23)])),
            json!({"jsonrpc": "2.0", "method": "subtract", "params": [42, 23], "id": 7})
        );
        assert_eq!(
            notification("hello", Params::None),
            json!({"jsonrpc": "2.0", "method": "hello"})
        );
    }
}
