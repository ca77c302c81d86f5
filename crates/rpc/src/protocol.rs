//! JSON-RPC 2.0 wire types for bidirectional stdio agents, and the line
//! classifier that routes a parsed message to the right handler (§4.C3).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}

pub const METHOD_NOT_FOUND: i64 = -32601;

/// `initialize` is sent with a fixed client identity (§4.C3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

pub fn client_info() -> ClientInfo {
    ClientInfo {
        name: "issue-execution-engine".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    }
}

/// One line of stdout, classified per the contract in §4.C3.
#[derive(Debug, Clone)]
pub enum ParsedMessage {
    Response(JsonRpcResponse),
    ServerRequest { id: u64, method: String, params: Option<Value> },
    Notification { method: String, params: Option<Value> },
    Unknown(String),
}

pub fn classify(line: &str) -> ParsedMessage {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return ParsedMessage::Unknown(line.to_string()),
    };
    let has_id = value.get("id").is_some();
    let has_method = value.get("method").and_then(|m| m.as_str()).is_some();
    let has_result_or_error = value.get("result").is_some() || value.get("error").is_some();

    if has_id && has_result_or_error && !has_method {
        if let Ok(resp) = serde_json::from_value::<JsonRpcResponse>(value) {
            return ParsedMessage::Response(resp);
        }
        return ParsedMessage::Unknown(line.to_string());
    }

    if has_id && has_method {
        let id = value.get("id").and_then(|v| v.as_u64());
        let method = value.get("method").and_then(|m| m.as_str()).map(|s| s.to_string());
        if let (Some(id), Some(method)) = (id, method) {
            return ParsedMessage::ServerRequest {
                id,
                method,
                params: value.get("params").cloned(),
            };
        }
        return ParsedMessage::Unknown(line.to_string());
    }

    if has_method && !has_id {
        let method = value.get("method").and_then(|m| m.as_str()).unwrap().to_string();
        return ParsedMessage::Notification {
            method,
            params: value.get("params").cloned(),
        };
    }

    ParsedMessage::Unknown(line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_response() {
        let line = r#"{"id":1,"result":{"userAgent":"codex/1.0"}}"#;
        match classify(line) {
            ParsedMessage::Response(r) => assert_eq!(r.id, 1),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn classifies_server_request() {
        let line = r#"{"id":99,"method":"item/commandExecution/requestApproval","params":{}}"#;
        match classify(line) {
            ParsedMessage::ServerRequest { id, method, .. } => {
                assert_eq!(id, 99);
                assert_eq!(method, "item/commandExecution/requestApproval");
            }
            other => panic!("expected server-request, got {other:?}"),
        }
    }

    #[test]
    fn classifies_notification() {
        let line = r#"{"method":"turn/completed","params":{}}"#;
        match classify(line) {
            ParsedMessage::Notification { method, .. } => assert_eq!(method, "turn/completed"),
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn classifies_unknown_for_garbage() {
        match classify("not json at all") {
            ParsedMessage::Unknown(raw) => assert_eq!(raw, "not json at all"),
            other => panic!("expected unknown, got {other:?}"),
        }
    }

    #[test]
    fn roundtrip_request_serialization() {
        let req = JsonRpcRequest::new(42, "turn/start", Some(serde_json::json!({"threadId": "t1"})));
        let json = serde_json::to_string(&req).unwrap();
        let parsed: JsonRpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req, parsed);
    }
}
