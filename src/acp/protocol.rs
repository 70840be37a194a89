//! ACP wire types.
//!
//! Models the JSON-RPC 2.0 envelope and the parameter/result objects
//! exchanged with the Kiro CLI agent over its stdio. Everything here is
//! plain data; framing lives in [`codec`](super::codec) and routing in
//! [`router`](super::router).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version tag stamped on every outbound frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol version sent with `initialize`.
pub const PROTOCOL_VERSION: &str = "1.0";

// ── JSON-RPC envelope ────────────────────────────────────────────────────────

/// A JSON-RPC 2.0 request, or a notification when `id` is `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: String,
    /// Method name (e.g., `session/prompt`).
    pub method: String,
    /// Method-specific payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Correlation identifier; absent for notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: String,
    /// Success payload; mutually exclusive with `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload; mutually exclusive with `result`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    /// Correlation identifier echoed from the request.
    pub id: Option<u64>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code (`-32601` is "method not found").
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Whether this error means the agent does not implement the method.
    #[must_use]
    pub fn is_method_not_found(&self) -> bool {
        self.code == -32601 || self.message.to_lowercase().contains("method not found")
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

/// A raw inbound frame before classification.
///
/// One frame is exactly one of: a response to us, an incoming request
/// from the agent, or a notification. Anything else is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingFrame {
    /// Version tag; tolerated when absent.
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Correlation identifier, when present.
    #[serde(default)]
    pub id: Option<u64>,
    /// Method name, when present.
    #[serde(default)]
    pub method: Option<String>,
    /// Request/notification payload.
    #[serde(default)]
    pub params: Option<Value>,
    /// Response success payload.
    #[serde(default)]
    pub result: Option<Value>,
    /// Response failure payload.
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl IncomingFrame {
    /// A response carries an id and no method.
    #[must_use]
    pub fn is_response(&self) -> bool {
        self.method.is_none() && self.id.is_some()
    }

    /// An incoming request from the agent carries both id and method.
    #[must_use]
    pub fn is_incoming_request(&self) -> bool {
        self.method.is_some() && self.id.is_some()
    }

    /// A notification carries a method and no id.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.method.is_some() && self.id.is_none()
    }
}

// ── Handshake ────────────────────────────────────────────────────────────────

/// Client identity reported during `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version string.
    pub version: String,
}

/// Parameters for the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version tag, currently [`PROTOCOL_VERSION`].
    pub protocol_version: String,
    /// Client identity.
    pub client_info: ClientInfo,
}

// ── Session lifecycle ────────────────────────────────────────────────────────

/// Parameters for the `session/new` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNewParams {
    /// Working directory handed to the agent.
    pub cwd: String,
    /// MCP server descriptors; always empty for this client.
    pub mcp_servers: Vec<Value>,
}

/// Parameters for the `session/load` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLoadParams {
    /// Previously persisted session identifier.
    pub session_id: String,
    /// Working directory handed to the agent.
    pub cwd: String,
    /// MCP server descriptors; always empty for this client.
    pub mcp_servers: Vec<Value>,
}

/// Result returned by `session/new` and `session/load`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOpenResult {
    /// Opaque session identifier.
    #[serde(default)]
    pub session_id: String,
    /// Model catalog advertised by the agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<ModelsInfo>,
    /// Mode catalog advertised by the agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modes: Option<ModesInfo>,
}

/// Available models reported by the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelsInfo {
    /// Ordered list of selectable models.
    pub available_models: Vec<ModelEntry>,
    /// Identifier of the currently selected model.
    pub current_model_id: String,
}

/// A single model the agent can use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelEntry {
    /// Stable model identifier.
    pub model_id: String,
    /// Display name.
    pub name: String,
    /// Optional longer description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Available interaction modes reported by the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModesInfo {
    /// Ordered list of selectable modes.
    pub available_modes: Vec<ModeEntry>,
    /// Identifier of the currently selected mode.
    pub current_mode_id: String,
}

/// A single interaction mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModeEntry {
    /// Stable mode identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Optional longer description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Parameters for the `session/prompt` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPromptParams {
    /// Session to run the turn on.
    pub session_id: String,
    /// Assembled prompt content.
    pub prompt: Vec<ContentBlock>,
}

/// Result returned when a `session/prompt` turn completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResult {
    /// Why the agent stopped (e.g., `end_turn`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    /// Context-usage snapshot, when the agent reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_usage: Option<Value>,
}

/// A slash command advertised by the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandEntry {
    /// Command name (e.g., `/compact`).
    pub name: String,
    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Result of `_kiro.dev/commands/available`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsResult {
    /// Advertised slash commands.
    #[serde(default)]
    pub commands: Vec<CommandEntry>,
}

// ── Content blocks ───────────────────────────────────────────────────────────

/// A typed content block in a `session/prompt` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text content.
    Text {
        /// The text payload.
        text: String,
    },
    /// A base64-encoded image.
    Image {
        /// Base64 image data.
        data: String,
        /// MIME type of the image.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// An embedded resource (document or file attachment).
    Resource {
        /// The resource payload.
        resource: ResourceContent,
    },
}

/// The payload of a `resource` content block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContent {
    /// Resource URI.
    pub uri: String,
    /// Text payload.
    pub text: String,
    /// MIME type of the text payload.
    pub mime_type: String,
}

// ── Permissions ──────────────────────────────────────────────────────────────

/// Parameters of an inbound `session/request_permission` request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPermissionParams {
    /// The tool call awaiting a decision; opaque to this client.
    #[serde(default)]
    pub tool_call: Value,
    /// Options the agent offers.
    #[serde(default)]
    pub options: Vec<PermissionOption>,
}

/// One selectable option in a permission request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOption {
    /// Identifier echoed back in the selection.
    pub option_id: String,
    /// Option kind (e.g., `allow_once`, `reject_always`).
    #[serde(default)]
    pub kind: Option<String>,
    /// Display name, when the agent sends one.
    #[serde(default)]
    pub name: Option<String>,
}

/// The `outcome` object of a permission response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOutcome {
    /// Outcome discriminator; this client always selects.
    pub outcome: String,
    /// Identifier of the selected option.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option_id: Option<String>,
}

/// Full result payload for `session/request_permission`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPermissionResponse {
    /// The decision.
    pub outcome: PermissionOutcome,
}

// ── Session updates ──────────────────────────────────────────────────────────

/// A file location attached to a tool-call update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolLocation {
    /// Path the tool touched.
    pub path: String,
    /// One-based line number, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
}

/// A new tool call announced by the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallInfo {
    /// Tool-call identifier.
    pub tool_call_id: String,
    /// Human-readable title.
    pub title: String,
    /// Tool kind (e.g., `edit`, `read`).
    pub kind: String,
}

/// An incremental update to an in-progress tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallUpdateInfo {
    /// Tool-call identifier.
    pub tool_call_id: String,
    /// Updated title, when the agent resends one.
    pub title: Option<String>,
    /// Updated status, when the agent sends one.
    pub status: Option<String>,
    /// Locations the tool touched.
    pub locations: Option<Vec<ToolLocation>>,
}

/// A parsed `session/update` payload.
///
/// Not serde-derived: the `sessionUpdate` discriminator requires manual
/// dispatch, and unknown kinds must be preserved rather than rejected.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// A chunk of the agent's response text.
    AgentMessageChunk {
        /// Chunk text.
        text: String,
    },
    /// A chunk of the agent's internal reasoning; not surfaced to turns.
    AgentThoughtChunk {
        /// Chunk text.
        text: String,
    },
    /// A new tool call.
    ToolCall(ToolCallInfo),
    /// An incremental update to an existing tool call.
    ToolCallUpdate(ToolCallUpdateInfo),
    /// A tool call finished.
    ToolResult {
        /// Tool-call identifier.
        tool_call_id: String,
        /// Title, when the agent resends one.
        title: Option<String>,
    },
    /// The turn ended; may carry a context-usage snapshot.
    TurnEnd {
        /// Context-usage snapshot, when present.
        context_usage: Option<Value>,
    },
    /// The agent switched interaction mode.
    CurrentModeUpdate {
        /// New mode identifier.
        mode_id: String,
    },
    /// The agent pushed a fresh slash-command catalog.
    AvailableCommandsUpdate(Vec<CommandEntry>),
    /// Unrecognized update kind, preserved as raw JSON.
    Unknown(Value),
}

impl SessionUpdate {
    /// Parse a session update from the raw `update` object.
    ///
    /// The `"sessionUpdate"` string field acts as the discriminator;
    /// anything unrecognized lands in [`SessionUpdate::Unknown`].
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let kind = value
            .get("sessionUpdate")
            .and_then(Value::as_str)
            .unwrap_or("");

        match kind {
            "agent_message_chunk" => Self::AgentMessageChunk {
                text: content_text(value),
            },
            "agent_thought_chunk" => Self::AgentThoughtChunk {
                text: content_text(value),
            },
            "tool_call" => Self::ToolCall(ToolCallInfo {
                tool_call_id: str_field(value, "toolCallId"),
                title: str_field(value, "title"),
                kind: str_field(value, "kind"),
            }),
            "tool_call_update" => Self::ToolCallUpdate(ToolCallUpdateInfo {
                tool_call_id: str_field(value, "toolCallId"),
                title: opt_str_field(value, "title"),
                status: opt_str_field(value, "status"),
                locations: value
                    .get("locations")
                    .and_then(|v| serde_json::from_value(v.clone()).ok()),
            }),
            "tool_result" => Self::ToolResult {
                tool_call_id: str_field(value, "toolCallId"),
                title: opt_str_field(value, "title"),
            },
            "turn_end" => Self::TurnEnd {
                context_usage: value.get("contextUsage").cloned(),
            },
            "current_mode_update" => Self::CurrentModeUpdate {
                mode_id: str_field(value, "modeId"),
            },
            "available_commands_update" => {
                let commands = value
                    .get("commands")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default();
                Self::AvailableCommandsUpdate(commands)
            }
            _ => Self::Unknown(value.clone()),
        }
    }
}

/// Extract `content.text` from a message-chunk update.
fn content_text(value: &Value) -> String {
    value
        .get("content")
        .and_then(|c| c.get("text"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_owned()
}

/// Extract a required string field, defaulting to empty.
fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_owned()
}

/// Extract an optional string field.
fn opt_str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(String::from)
}

/// Read a context-usage percentage out of a `contextUsage` value.
///
/// Accepts either `{ "percentage": 42.5 }` or a bare number.
#[must_use]
pub fn context_usage_percentage(value: &Value) -> Option<f64> {
    value
        .get("percentage")
        .and_then(Value::as_f64)
        .or_else(|| value.as_f64())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
