//! Method names and typed payloads carried inside frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::frame::RequestId;

pub const PROTOCOL_NAME: &str = "mcp/1.0";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ── Client → server requests ─────────────────────────────────────────

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_PING: &str = "ping";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";
pub const METHOD_AUTH_LOGOUT: &str = "auth/logout";

// ── Client → server notifications ────────────────────────────────────

pub const NOTIFY_CANCELLED: &str = "notifications/cancelled";

// ── Server → client notifications ────────────────────────────────────

pub const NOTIFY_HANDSHAKE: &str = "handshake";
pub const NOTIFY_AUTH_COMPLETED: &str = "auth/completed";
pub const NOTIFY_AUTH_FAILED: &str = "auth/failed";
pub const NOTIFY_AUTH_EXPIRED: &str = "auth/expired";
pub const NOTIFY_PROGRESS: &str = "tools/progress";
pub const NOTIFY_SESSION_CANCELLED: &str = "session/cancelled";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handshake / initialize
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub tools: bool,
    pub resources: bool,
    pub prompts: bool,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: true,
            resources: false,
            prompts: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl ServerInfo {
    pub fn current() -> Self {
        Self {
            name: "hamcp".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

/// Sent unprompted as the first notification on a new stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeParams {
    pub protocol: String,
    pub version: String,
    pub session_id: String,
    pub capabilities: ServerCapabilities,
    /// Whether the session is already authenticated (bearer adoption).
    pub authenticated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub server_info: ServerInfo,
    pub capabilities: ServerCapabilities,
    pub session_id: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single tool definition returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<ToolDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// A single content item in a `tools/call` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub content: Vec<ToolCallContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
    /// The raw handler output, for clients that prefer JSON over text.
    #[serde(default, rename = "structuredContent", skip_serializing_if = "Value::is_null")]
    pub structured_content: Value,
}

impl ToolCallResult {
    pub fn from_value(value: Value) -> Self {
        let text = match &value {
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        };
        Self {
            content: vec![ToolCallContent {
                content_type: "text".into(),
                text,
            }],
            is_error: false,
            structured_content: value,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Notifications
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelledParams {
    pub request_id: RequestId,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressParams {
    pub request_id: RequestId,
    pub progress: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCancelledParams {
    pub reason: String,
}
