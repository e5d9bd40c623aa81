//! JSON-RPC envelopes and the MCP payloads used by the markitdown relay

use markitdown_core::{MarkitdownError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// JSON-RPC 2.0 notification (no id, no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A validated response, matched to its call purely by `id`.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcResponse {
    Success { id: u64, result: Value },
    Failure { id: u64, error: JsonRpcError },
}

impl JsonRpcResponse {
    pub fn id(&self) -> u64 {
        match self {
            JsonRpcResponse::Success { id, .. } | JsonRpcResponse::Failure { id, .. } => *id,
        }
    }

    pub fn into_result(self) -> Result<Value> {
        match self {
            JsonRpcResponse::Success { result, .. } => Ok(result),
            JsonRpcResponse::Failure { error, .. } => Err(MarkitdownError::Rpc {
                code: error.code,
                message: error.message,
            }),
        }
    }
}

/// Anything that can arrive on the `message` event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    Response(JsonRpcResponse),
    /// Server-initiated traffic (progress notifications, pings). Not correlated.
    Notification { method: String, params: Option<Value> },
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// Parse and validate the payload of a `message` event.
pub fn parse_incoming(data: &str) -> Result<IncomingMessage> {
    let raw: RawMessage = serde_json::from_str(data)?;

    if let Some(method) = raw.method {
        return Ok(IncomingMessage::Notification {
            method,
            params: raw.params,
        });
    }

    let id = match raw.id {
        Some(Value::Number(n)) => n.as_u64(),
        // Some relays echo ids back as strings
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| MarkitdownError::Protocol("response is missing a numeric id".into()))?;

    let response = match raw.error {
        Some(error) => JsonRpcResponse::Failure { id, error },
        None => JsonRpcResponse::Success {
            id,
            result: raw.result.unwrap_or(Value::Null),
        },
    };
    Ok(IncomingMessage::Response(response))
}

/// Client capabilities
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Initialize request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub client_info: ClientInfo,
}

/// Initialize response result. Only used for logging, so every field is lenient.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Tool definition advertised by the upstream server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<McpTool>,
}

/// Tool call result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolCallResult {
    /// Text items joined by newlines; non-text items are skipped.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|item| match item {
                ContentItem::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Content item in tool results
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentItem {
    Text { text: String },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource { resource: Value },
    #[serde(other)]
    Unsupported,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_envelope_shape() {
        let request = JsonRpcRequest::new(7, "tools/call", Some(json!({"name": "x"})));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "method": "tools/call", "params": {"name": "x"}, "id": 7})
        );
    }

    #[test]
    fn test_notification_has_no_id() {
        let notification = JsonRpcNotification::new("notifications/initialized", None);
        let value = serde_json::to_value(&notification).unwrap();
        assert!(value.get("id").is_none());
        assert!(value.get("params").is_none());
    }

    #[test]
    fn test_parse_success_and_failure() {
        let ok = parse_incoming(r##"{"jsonrpc":"2.0","id":3,"result":"# Title"}"##).unwrap();
        assert_eq!(
            ok,
            IncomingMessage::Response(JsonRpcResponse::Success {
                id: 3,
                result: json!("# Title")
            })
        );

        let failed =
            parse_incoming(r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32000,"message":"bad uri"}}"#)
                .unwrap();
        let IncomingMessage::Response(response) = failed else {
            panic!("expected a response");
        };
        assert_eq!(response.id(), 4);
        assert_eq!(response.into_result().unwrap_err().to_string(), "bad uri");
    }

    #[test]
    fn test_parse_error_without_code() {
        let parsed = parse_incoming(r#"{"id":1,"error":{"message":"nope"}}"#).unwrap();
        let IncomingMessage::Response(JsonRpcResponse::Failure { error, .. }) = parsed else {
            panic!("expected a failure");
        };
        assert_eq!(error.code, None);
    }

    #[test]
    fn test_parse_notification_and_garbage() {
        let parsed = parse_incoming(
            r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{"progressToken":2}}"#,
        )
        .unwrap();
        assert!(matches!(parsed, IncomingMessage::Notification { ref method, .. } if method == "notifications/progress"));

        assert!(parse_incoming(r#"{"jsonrpc":"2.0","result":1}"#).is_err());
        assert!(parse_incoming("not json").is_err());
    }

    #[test]
    fn test_string_ids_are_accepted() {
        let parsed = parse_incoming(r#"{"id":"12","result":null}"#).unwrap();
        let IncomingMessage::Response(response) = parsed else {
            panic!("expected a response");
        };
        assert_eq!(response.id(), 12);
    }

    #[test]
    fn test_tool_result_text() {
        let result: ToolCallResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "# Title"},
                {"type": "image", "data": "AAAA", "mimeType": "image/png"},
                {"type": "audio", "data": "AAAA"},
                {"type": "text", "text": "Body"}
            ]
        }))
        .unwrap();
        assert_eq!(result.text(), "# Title\nBody");
        assert!(matches!(result.content[2], ContentItem::Unsupported));
    }
}
