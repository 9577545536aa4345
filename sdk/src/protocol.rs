//! Tool protocol wire types
//!
//! Tool servers speak JSON-RPC 2.0 over stdio, one JSON document per line.
//! A session is opened with `initialize`, acknowledged with the
//! `notifications/initialized` notification, and then serves `tools/list`
//! and `tools/call` requests until stdin closes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Protocol revision announced during `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const JSONRPC_VERSION: &str = "2.0";

/// Method names used by the client and the bundled servers.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const CANCELLED: &str = "notifications/cancelled";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
}

/// Standard JSON-RPC error codes.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Value::from(id),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }

    /// Notification telling a server to stop working on `request_id`.
    pub fn cancelled(request_id: u64, reason: &str) -> Self {
        Self::new(
            methods::CANCELLED,
            Some(json!({ "requestId": request_id, "reason": reason })),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Numeric request id, when the peer used one.
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.as_u64()
    }

    /// Collapses the response into the result value or the error object.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// A classified message read off the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Request(RpcRequest),
    Notification(RpcNotification),
    Response(RpcResponse),
}

impl Incoming {
    /// Classifies a decoded JSON value.
    ///
    /// Returns `None` for values that are not JSON-RPC messages at all.
    pub fn classify(value: Value) -> Option<Self> {
        let obj = value.as_object()?;
        let has_id = obj.get("id").is_some_and(|id| !id.is_null());
        let has_method = obj.get("method").is_some_and(Value::is_string);
        let is_response = obj.contains_key("result") || obj.contains_key("error");

        if has_method && has_id {
            serde_json::from_value(value).ok().map(Self::Request)
        } else if has_method {
            serde_json::from_value(value).ok().map(Self::Notification)
        } else if is_response {
            serde_json::from_value(value).ok().map(Self::Response)
        } else {
            None
        }
    }

    /// Parses and classifies one line of input.
    pub fn from_line(line: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(line.trim()).ok()?;
        Self::classify(value)
    }
}

/// One tool advertised by a server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "empty_schema")]
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

fn empty_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// Result body of `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListToolsResult {
    pub tools: Vec<ToolDescriptor>,
    #[serde(rename = "nextCursor", default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// A content item inside a tool call result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text {
        text: String,
    },
    Image {
        #[serde(default)]
        data: String,
        #[serde(rename = "mimeType", default)]
        mime_type: String,
    },
    #[serde(other)]
    Unsupported,
}

/// Result body of `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<Content>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolCallResult {
    /// A successful result carrying one text item.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// A domain error reported back to the caller as content.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![Content::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// Flattens the content into a single string.
    ///
    /// Text items are joined with newlines; images are summarized since the
    /// conversation only carries text.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|item| match item {
                Content::Text { text } => text.clone(),
                Content::Image { mime_type, .. } => format!("[image: {}]", mime_type),
                Content::Unsupported => "[unsupported content]".to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_request_notification_response() {
        let request = Incoming::from_line(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#);
        assert!(matches!(request, Some(Incoming::Request(ref r)) if r.method == "tools/list"));

        let notification =
            Incoming::from_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
        assert!(matches!(notification, Some(Incoming::Notification(_))));

        let response = Incoming::from_line(r#"{"jsonrpc":"2.0","id":7,"result":{}}"#);
        match response {
            Some(Incoming::Response(r)) => assert_eq!(r.numeric_id(), Some(7)),
            other => panic!("Expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_rejects_noise() {
        assert!(Incoming::from_line("Loading model weights...").is_none());
        assert!(Incoming::from_line("[1, 2, 3]").is_none());
        assert!(Incoming::from_line(r#"{"hello":"world"}"#).is_none());
    }

    #[test]
    fn test_error_response_into_result() {
        let response = RpcResponse::failure(json!(3), codes::METHOD_NOT_FOUND, "nope");
        let err = response.into_result().unwrap_err();
        assert_eq!(err.code, -32601);
        assert_eq!(err.message, "nope");
    }

    #[test]
    fn test_tool_descriptor_defaults() {
        let tool: ToolDescriptor = serde_json::from_value(json!({ "name": "ping" })).unwrap();
        assert_eq!(tool.description, "");
        assert_eq!(tool.input_schema["type"], "object");
    }

    #[test]
    fn test_call_result_wire_format() {
        let result: ToolCallResult = serde_json::from_value(json!({
            "content": [
                { "type": "text", "text": "line one" },
                { "type": "image", "data": "AAAA", "mimeType": "image/png" },
                { "type": "audio", "data": "..." }
            ],
            "isError": true
        }))
        .unwrap();

        assert!(result.is_error);
        assert_eq!(
            result.joined_text(),
            "line one\n[image: image/png]\n[unsupported content]"
        );

        let encoded = serde_json::to_value(ToolCallResult::text("ok")).unwrap();
        assert_eq!(encoded["content"][0]["type"], "text");
        assert_eq!(encoded["isError"], false);
    }

    #[test]
    fn test_cancelled_notification_shape() {
        let note = RpcNotification::cancelled(42, "user interrupt");
        let encoded = serde_json::to_value(&note).unwrap();
        assert_eq!(encoded["method"], "notifications/cancelled");
        assert_eq!(encoded["params"]["requestId"], 42);
        assert!(encoded.get("id").is_none());
    }
}
