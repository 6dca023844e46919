//! Core data types used throughout expandai.
//!
//! This module defines the conversation messages, tool schemas, tool
//! calls and the events a turn emits to its caller.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// JSON object carrying a tool call's arguments.
///
/// Argument shape is schema-driven and differs per tool, so it stays an
/// untyped mapping instead of a fixed struct.
pub type ToolArgs = Map<String, Value>;

// --- Message Roles ---

/// The role of a message in the conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

// --- Tool Call ---

/// A tool invocation requested by the model.
///
/// Produced from the provider's structured response on the native path,
/// or from the `ACTION:`/`INPUT:` text protocol on the fallback path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier used to pair the call with its result.
    pub id: String,
    /// Name of the tool to invoke (e.g. "web_search")
    pub name: String,
    pub args: ToolArgs,
}

impl ToolCall {
    /// Create a call with a freshly generated ID, for providers and
    /// protocols that do not supply one.
    pub fn new(name: impl Into<String>, args: ToolArgs) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            args,
        }
    }
}

// --- Tool Definition ---

/// One declared parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    /// JSON type name ("string", "integer", ...)
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

impl ToolParameter {
    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: "string".to_string(),
            description: description.into(),
        }
    }
}

/// Describes a tool's interface to the LLM.
///
/// Parameters are kept as an ordered list: the fallback protocol binds its
/// single free-text input to the first declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Stable identifier, unique within a turn's active tool set
    pub name: String,
    /// Sent to the LLM as part of the tool contract
    pub description: String,
    pub parameters: Vec<ToolParameter>,
    /// Subset of the declared parameter names
    pub required: Vec<String>,
}

impl ToolDefinition {
    /// Name of the first declared parameter, if any.
    pub fn first_parameter(&self) -> Option<&str> {
        self.parameters.first().map(|p| p.name.as_str())
    }

    /// JSON Schema object for the tool's parameters.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            properties.insert(
                param.name.clone(),
                json!({ "type": param.kind, "description": param.description }),
            );
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
        })
    }

    /// The `{"type":"function","function":{...}}` wire form shared by
    /// Ollama and OpenAI-compatible endpoints.
    pub fn to_function_schema(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters_schema(),
            }
        })
    }
}

// --- Messages ---

/// A single message in the conversation history.
///
/// Insertion order is the model's context window. Past entries are never
/// mutated; drivers only append to private copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Tool calls attached to an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool result messages, links back to the tool call ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: vec![],
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create an assistant message that includes tool calls.
    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }
}

// --- Provider Responses ---

/// The result of a non-streaming completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    /// Text content (may be empty if only tool calls)
    pub content: String,
    /// Tool calls in the order the provider returned them
    pub tool_calls: Vec<ToolCall>,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: vec![],
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// One fragment of a streamed completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub content: String,
    pub done: bool,
}

impl StreamChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            done: false,
        }
    }

    pub fn done() -> Self {
        Self {
            content: String::new(),
            done: true,
        }
    }
}

// --- Turn Events ---

/// An event delivered to the caller during a turn.
///
/// Within a turn, a `ToolResult` always follows the `ToolCall` with the same
/// `call_id`, and exactly one `Chunk { done: true }` closes the sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    Chunk {
        content: String,
        done: bool,
    },
    ToolCall {
        call_id: String,
        tool_name: String,
        args: ToolArgs,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        result: String,
    },
}

impl StreamEvent {
    pub fn chunk(content: impl Into<String>) -> Self {
        StreamEvent::Chunk {
            content: content.into(),
            done: false,
        }
    }

    pub fn terminal() -> Self {
        Self::terminal_with("")
    }

    pub fn terminal_with(content: impl Into<String>) -> Self {
        StreamEvent::Chunk {
            content: content.into(),
            done: true,
        }
    }

    pub fn tool_call(call: &ToolCall) -> Self {
        StreamEvent::ToolCall {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            args: call.args.clone(),
        }
    }

    pub fn tool_result(call: &ToolCall, result: impl Into<String>) -> Self {
        StreamEvent::ToolResult {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            result: result.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Chunk { done: true, .. })
    }
}

impl From<StreamChunk> for StreamEvent {
    fn from(chunk: StreamChunk) -> Self {
        StreamEvent::Chunk {
            content: chunk.content,
            done: chunk.done,
        }
    }
}

/// A turn event tagged with the turn and agent it belongs to, so callers can
/// demultiplex concurrent turns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaggedEvent {
    pub turn_id: String,
    pub agent_id: String,
    pub event: StreamEvent,
}

/// One executed tool call as recorded in a turn's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub args: ToolArgs,
    pub result: String,
}
