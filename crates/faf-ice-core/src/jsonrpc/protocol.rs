//! JSON-RPC 2.0 message types exchanged with the ICE adapter.
//!
//! Requests carry positional `params`. A request without `id` is a
//! notification and never gets a response.

use crate::error::{IceError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Error code sent back for calls to unregistered methods.
pub const METHOD_NOT_FOUND: i32 = -32601;

/// JSON-RPC 2.0 request or notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Peers may omit the version; a `method` key alone marks a request.
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

impl RpcRequest {
    /// A request expecting a response with the given id.
    pub fn call(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: Some(Value::Number(id.into())),
        }
    }

    /// A fire-and-forget notification.
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: None,
        }
    }
}

/// JSON-RPC 2.0 response written back for inbound requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
    pub id: Option<Value>,
}

impl RpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(RpcErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }

    pub fn method_not_found(id: Option<Value>) -> Self {
        Self::error(id, METHOD_NOT_FOUND, "no such method")
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An inbound message, classified by the presence of `method`.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    Request(RpcRequest),
    /// A response to one of our calls. `outcome` is `Err` with the raw `error`
    /// value when the peer reported a failure.
    Response {
        id: Option<Value>,
        outcome: std::result::Result<Value, Value>,
    },
}

impl RpcMessage {
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut obj) = value else {
            return Err(IceError::Json {
                message: "JSON-RPC message is not an object".to_string(),
                source: None,
            });
        };

        if obj.contains_key("method") {
            let request = serde_json::from_value(Value::Object(obj))?;
            return Ok(RpcMessage::Request(request));
        }

        let id = obj.remove("id");
        // "result": null is a valid success; only a non-null error marks failure.
        let outcome = match obj.remove("error") {
            Some(error) if !error.is_null() => Err(error),
            _ => Ok(obj.remove("result").unwrap_or(Value::Null)),
        };
        Ok(RpcMessage::Response { id, outcome })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_serialization() {
        let req = RpcRequest::call("status", json!([]), 7);
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "method": "status", "params": [], "id": 7})
        );
    }

    #[test]
    fn test_notification_has_no_id() {
        let req = RpcRequest::notification("quit", json!([]));
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("\"id\""));
    }

    #[test]
    fn test_method_not_found_response() {
        let resp = RpcResponse::method_not_found(Some(json!(3)));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["error"]["code"], json!(-32601));
        assert_eq!(value["error"]["message"], json!("no such method"));
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_classify_request() {
        let msg = RpcMessage::from_value(json!({
            "jsonrpc": "2.0",
            "method": "onConnectionStateChanged",
            "params": ["Connected"]
        }))
        .unwrap();
        match msg {
            RpcMessage::Request(req) => {
                assert_eq!(req.method, "onConnectionStateChanged");
                assert!(req.id.is_none());
            }
            other => panic!("Expected request, got: {:?}", other),
        }
    }

    #[test]
    fn test_classify_request_without_version() {
        let msg = RpcMessage::from_value(json!({"method": "onConnected", "params": [1], "id": 5}))
            .unwrap();
        match msg {
            RpcMessage::Request(req) => {
                assert_eq!(req.jsonrpc, "2.0");
                assert_eq!(req.method, "onConnected");
                assert_eq!(req.id, Some(json!(5)));
            }
            other => panic!("Expected request, got: {:?}", other),
        }
    }

    #[test]
    fn test_classify_null_result_as_success() {
        let msg =
            RpcMessage::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": null})).unwrap();
        assert_eq!(
            msg,
            RpcMessage::Response {
                id: Some(json!(1)),
                outcome: Ok(Value::Null)
            }
        );
    }

    #[test]
    fn test_classify_error_response() {
        let msg = RpcMessage::from_value(json!({"id": 2, "error": "no such method"})).unwrap();
        assert_eq!(
            msg,
            RpcMessage::Response {
                id: Some(json!(2)),
                outcome: Err(json!("no such method"))
            }
        );
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert!(RpcMessage::from_value(json!([1, 2])).is_err());
    }
}
