//! Wire and payload types.
//!
//! The transport speaks JSON-RPC 2.0; the payloads follow the Model Context
//! Protocol. See: <https://modelcontextprotocol.io/>

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC protocol tag carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol version offered during initialization.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Handshake request method.
pub const METHOD_INITIALIZE: &str = "initialize";

/// Post-initialize notification method.
pub const METHOD_INITIALIZED: &str = "initialized";

/// Tool discovery method.
pub const METHOD_TOOLS_LIST: &str = "tools/list";

/// Standard tool invocation method.
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// SPARQL execution method exposed by the spendcast-style servers.
pub const METHOD_EXECUTE_SPARQL: &str = "execute_sparql";

/// Liveness check a server may send to the client.
pub const METHOD_PING: &str = "ping";

/// JSON-RPC "method not found" error code.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC response sent back to a server-initiated request.
///
/// The id is echoed verbatim since servers may use string ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcReply {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcReply {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Build an error from a loosely shaped `error` member.
    ///
    /// Some servers send a bare string or omit the code; those still have
    /// to reach the caller.
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<JsonRpcError>(value.clone()) {
            Ok(error) => error,
            Err(_) => {
                let message = match &value {
                    Value::String(s) => s.clone(),
                    other => other
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| other.to_string()),
                };
                Self {
                    code: value.get("code").and_then(Value::as_i64).unwrap_or(0),
                    message,
                    data: Some(value),
                }
            }
        }
    }
}

/// JSON-RPC notification (no id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a new JSON-RPC notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A decoded frame from the server, classified by its members.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// Answer to one of our requests.
    Response {
        id: Value,
        outcome: Result<Value, JsonRpcError>,
    },
    /// A request the server expects us to answer.
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    /// Fire-and-forget message from the server.
    Notification {
        method: String,
        params: Option<Value>,
    },
    /// Anything else.
    Invalid(Value),
}

impl IncomingMessage {
    /// Classify a decoded value by the presence of `id`, `method`,
    /// `result` and `error`.
    pub fn classify(value: Value) -> Self {
        let Value::Object(mut map) = value else {
            return Self::Invalid(value);
        };

        let id = map.remove("id").filter(|id| !id.is_null());
        let method = map
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string);
        let params = map.remove("params");

        match (id, method) {
            (Some(id), Some(method)) => Self::Request { id, method, params },
            (None, Some(method)) => Self::Notification { method, params },
            (Some(id), None) => {
                if let Some(error) = map.remove("error").filter(|e| !e.is_null()) {
                    Self::Response {
                        id,
                        outcome: Err(JsonRpcError::from_value(error)),
                    }
                } else if let Some(result) = map.remove("result") {
                    Self::Response {
                        id,
                        outcome: Ok(result),
                    }
                } else {
                    map.insert("id".to_string(), id);
                    Self::Invalid(Value::Object(map))
                }
            }
            (None, None) => Self::Invalid(Value::Object(map)),
        }
    }
}

/// MCP initialization parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: Value::Object(Default::default()),
            client_info: ClientInfo::default(),
        }
    }
}

/// Client info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl ClientInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "toolwire".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// MCP initialization result.
///
/// Only `capabilities` is required; minimal servers omit the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
}

impl InitializeResult {
    /// Check if the server advertises tools.
    pub fn supports_tools(&self) -> bool {
        self.capabilities.get("tools").is_some()
    }
}

/// Server info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// MCP tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    /// Tool name.
    pub name: String,
    /// Tool description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// List tools result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<McpTool>,
}

/// Tool call parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// Tool call result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content returned by the tool.
    #[serde(default)]
    pub content: Vec<ToolContent>,
    /// Whether the tool call resulted in an error.
    #[serde(default)]
    pub is_error: bool,
    /// Structured result, when the server provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl ToolCallResult {
    /// Best-effort structured payload of the call.
    ///
    /// Prefers an explicit json content item, then structured content, then
    /// a text item that parses as JSON, then the whole result.
    pub fn json_payload(&self) -> Value {
        for item in &self.content {
            if let ToolContent::Json { json } = item {
                return json.clone();
            }
        }
        if let Some(structured) = &self.structured_content {
            return structured.clone();
        }
        for item in &self.content {
            if let ToolContent::Text { text } = item {
                if let Ok(value) = serde_json::from_str::<Value>(text) {
                    return value;
                }
            }
        }
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Tool content item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "json")]
    Json { json: Value },
    #[serde(rename = "image")]
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    #[serde(rename = "resource")]
    Resource { resource: Value },
    #[serde(other)]
    Unknown,
}
