//! Newline-delimited JSON protocol types.
//!
//! Each line is one JSON document. Requests carry `{id, method, params}`;
//! responses `{id, success, result?|error?}`. A one-shot ready handshake is
//! emitted before the first request is read.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An incoming request.
#[derive(Debug, Clone, Deserialize)]
pub struct IpcRequest {
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// An outgoing response.
#[derive(Debug, Clone, Serialize)]
pub struct IpcResponse {
    pub id: Value,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self { id, success: true, result: Some(result), error: None }
    }

    pub fn err(id: Value, error: impl Into<String>) -> Self {
        Self { id, success: false, result: None, error: Some(error.into()) }
    }
}

/// The startup handshake.
#[derive(Debug, Clone, Serialize)]
pub struct ReadyHandshake {
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub version: &'static str,
    pub services: Vec<String>,
}

impl ReadyHandshake {
    pub fn new(services: Vec<String>) -> Self {
        Self { message_type: "ready", version: env!("CARGO_PKG_VERSION"), services }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parses_with_optional_params() {
        let request: IpcRequest =
            serde_json::from_str(r#"{"id": 1, "method": "ping"}"#).unwrap();
        assert_eq!(request.method, "ping");
        assert!(request.params.is_null());

        let with_params: IpcRequest = serde_json::from_str(
            r#"{"id": "abc", "method": "chat.query", "params": {"query": "hi"}}"#,
        )
        .unwrap();
        assert_eq!(with_params.params["query"], "hi");
    }

    #[test]
    fn responses_serialize_minimal_shape() {
        let ok = serde_json::to_value(IpcResponse::ok(Value::from(1), Value::from("pong"))).unwrap();
        assert_eq!(ok["success"], true);
        assert_eq!(ok["result"], "pong");
        assert!(ok.get("error").is_none());

        let err =
            serde_json::to_value(IpcResponse::err(Value::from(2), "unknown method: nope")).unwrap();
        assert_eq!(err["success"], false);
        assert!(err.get("result").is_none());
        assert_eq!(err["error"], "unknown method: nope");
    }

    #[test]
    fn handshake_shape() {
        let handshake = serde_json::to_value(ReadyHandshake::new(vec!["capture".into()])).unwrap();
        assert_eq!(handshake["type"], "ready");
        assert_eq!(handshake["services"][0], "capture");
    }
}
