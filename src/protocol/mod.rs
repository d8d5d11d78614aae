// src/protocol/mod.rs
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Protocol version we answer with when the client does not ask for one.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

pub const SERVER_NAME: &str = "matlab-mcp";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

// JSON-RPC 2.0 error codes.
pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

// 1. The Request Struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    // Ids may be numbers or strings, so we keep them as raw JSON values.
    pub id: Value,
}

// 2. The Notification Struct (a request with no id, so no reply expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

// 3. The Response Struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    // Constructors enforce the invariant: exactly one of result/error is set.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn error_with_data(id: Value, code: i32, message: impl Into<String>, data: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: Some(data),
            }),
        }
    }
}

// --- THE MESSAGE UNION ---
// Inbound frames are one of three shapes, distinguished by field presence.
// We validate on decode instead of poking at untyped JSON later.
#[derive(Debug, Clone)]
pub enum Message {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
}

impl Message {
    pub fn decode(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| anyhow!("JSON-RPC message must be an object"))?;

        let has_id = obj.get("id").map(|v| !v.is_null()).unwrap_or(false);
        let has_method = obj.contains_key("method");
        let has_outcome = obj.contains_key("result") || obj.contains_key("error");

        if has_method && has_id {
            Ok(Message::Request(serde_json::from_value(value)?))
        } else if has_method {
            Ok(Message::Notification(serde_json::from_value(value)?))
        } else if has_outcome {
            let response: JsonRpcResponse = serde_json::from_value(value)?;
            if response.result.is_some() == response.error.is_some() {
                return Err(anyhow!("response must carry exactly one of result/error"));
            }
            Ok(Message::Response(response))
        } else {
            Err(anyhow!("message has neither method nor result/error"))
        }
    }
}

// --- MCP SPECIFIC TYPES ---

// We add this line to ALL MCP structs to handle the case conversion
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: Capabilities,
    pub server_info: ServerInfo,
}

// Empty-but-present capability objects: clients check for the keys.
#[derive(Debug, Serialize, Deserialize)]
pub struct Capabilities {
    pub tools: Value,
    pub resources: Value,
    pub prompts: Value,
}

impl Capabilities {
    pub fn empty() -> Self {
        Self {
            tools: serde_json::json!({}),
            resources: serde_json::json!({}),
            prompts: serde_json::json!({}),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl ServerInfo {
    pub fn current() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: SERVER_VERSION.to_string(),
        }
    }
}

// --- TOOL TYPES ---

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    pub description: String,
    // The "inputSchema" tells the client what arguments the tool needs.
    pub input_schema: Value,
}

#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub content: Vec<Content>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Content {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

impl ToolCallResult {
    pub fn text(text: impl Into<String>, is_error: bool) -> Self {
        Self {
            content: vec![Content {
                content_type: "text".to_string(),
                text: text.into(),
            }],
            is_error,
        }
    }
}
