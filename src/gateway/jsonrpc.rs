//! JSON-RPC 2.0 envelope checks and error bodies for the gateway.

use serde::Serialize;
use serde_json::Value;

/// Invalid Request
pub const INVALID_REQUEST: i32 = -32600;
/// Internal error
pub const INTERNAL_ERROR: i32 = -32603;
/// Implementation-defined server error used when the backend cannot be reached
pub const BACKEND_UNAVAILABLE: i32 = -32000;

/// Summary of a validated request body
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Method of each message, in order
    pub methods: Vec<String>,
    /// Id of the first message, echoed in gateway-generated errors
    pub id: Option<Value>,
    pub batch: bool,
}

impl Envelope {
    /// Method name for audit records; batches are joined with commas.
    pub fn method_label(&self) -> String {
        self.methods.join(",")
    }
}

/// JSON-RPC response carrying only an error
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcErrorResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    pub error: JsonRpcError,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcErrorResponse {
    pub fn new(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: id.unwrap_or(Value::Null),
            error: JsonRpcError {
                code,
                message: message.into(),
            },
        }
    }
}

/// Parse and check a request body without altering it.
pub fn validate(body: &[u8]) -> Result<Envelope, String> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| format!("body is not valid JSON: {}", e))?;

    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err("batch must not be empty".to_string());
            }
            let mut methods = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let method =
                    validate_message(item).map_err(|e| format!("batch item {}: {}", index, e))?;
                methods.push(method);
            }
            Ok(Envelope {
                methods,
                id: items.first().and_then(|item| item.get("id").cloned()),
                batch: true,
            })
        }
        other => {
            let method = validate_message(&other)?;
            Ok(Envelope {
                methods: vec![method],
                id: other.get("id").cloned(),
                batch: false,
            })
        }
    }
}

/// Best-effort request id of a single, possibly malformed, message.
pub fn request_id(body: &[u8]) -> Option<Value> {
    serde_json::from_slice::<Value>(body)
        .ok()?
        .get("id")
        .filter(|id| id.is_string() || id.is_number())
        .cloned()
}

fn validate_message(message: &Value) -> Result<String, String> {
    let object = message
        .as_object()
        .ok_or_else(|| "message must be a JSON object".to_string())?;

    if object.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err("jsonrpc must be \"2.0\"".to_string());
    }

    let method = match object.get("method") {
        Some(Value::String(method)) if !method.is_empty() => method.clone(),
        _ => return Err("method must be a non-empty string".to_string()),
    };

    match object.get("params") {
        None | Some(Value::Object(_)) | Some(Value::Array(_)) => {}
        Some(_) => return Err("params must be an object or an array".to_string()),
    }

    match object.get("id") {
        None | Some(Value::String(_)) | Some(Value::Number(_)) | Some(Value::Null) => {}
        Some(_) => return Err("id must be a string, a number or null".to_string()),
    }

    Ok(method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_request() {
        let envelope = validate(
            br#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"echo"}}"#,
        )
        .unwrap();
        assert_eq!(envelope.methods, vec!["tools/call".to_string()]);
        assert_eq!(envelope.id, Some(json!(7)));
        assert!(!envelope.batch);

        // Notifications carry no id.
        let envelope = validate(br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .unwrap();
        assert_eq!(envelope.id, None);
    }

    #[test]
    fn test_batch() {
        let envelope = validate(
            br#"[{"jsonrpc":"2.0","id":"a","method":"tools/list"},{"jsonrpc":"2.0","method":"ping","params":[]}]"#,
        )
        .unwrap();
        assert!(envelope.batch);
        assert_eq!(envelope.method_label(), "tools/list,ping");
        assert_eq!(envelope.id, Some(json!("a")));

        assert!(validate(b"[]").is_err());
        assert!(validate(br#"[{"jsonrpc":"2.0","method":"ok"},{"jsonrpc":"1.0","method":"x"}]"#).is_err());
    }

    #[test]
    fn test_rejected_envelopes() {
        let cases: [&[u8]; 8] = [
            b"not json",
            br#""tools/list""#,
            br#"{"method":"tools/list"}"#,
            br#"{"jsonrpc":"2.0"}"#,
            br#"{"jsonrpc":"2.0","method":""}"#,
            br#"{"jsonrpc":"2.0","method":5}"#,
            br#"{"jsonrpc":"2.0","method":"x","params":"flat"}"#,
            br#"{"jsonrpc":"2.0","method":"x","id":{"nested":true}}"#,
        ];
        for case in cases {
            assert!(validate(case).is_err(), "{}", String::from_utf8_lossy(case));
        }
    }

    #[test]
    fn test_request_id_of_malformed_message() {
        assert_eq!(
            request_id(br#"{"jsonrpc":"1.0","id":3,"method":"x"}"#),
            Some(json!(3))
        );
        assert_eq!(request_id(br#"{"id":{"nested":true}}"#), None);
        assert_eq!(request_id(b"[1,2]"), None);
        assert_eq!(request_id(b"garbage"), None);
    }

    #[test]
    fn test_error_body() {
        let body = serde_json::to_value(JsonRpcErrorResponse::new(
            Some(json!(3)),
            BACKEND_UNAVAILABLE,
            "backend unavailable",
        ))
        .unwrap();
        assert_eq!(
            body,
            json!({"jsonrpc":"2.0","id":3,"error":{"code":-32000,"message":"backend unavailable"}})
        );

        let body = serde_json::to_value(JsonRpcErrorResponse::new(None, INVALID_REQUEST, "bad"))
            .unwrap();
        assert_eq!(body["id"], Value::Null);
    }
}
