//! Model response projection.
//!
//! Only the handful of fields the session store inspects are modelled; any
//! other upstream payload rides along in [`Event::payload`](crate::Event).

use serde::{Deserialize, Serialize};

/// Message author role.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt or synthetic context.
    System,
    /// End user.
    User,
    /// Model output.
    #[default]
    Assistant,
    /// Tool result.
    Tool,
}

/// Function invocation inside a tool call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name.
    #[serde(default)]
    pub name: String,
    /// Raw JSON arguments.
    #[serde(default)]
    pub arguments: String,
}

/// A tool call requested by the model.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool call id.
    #[serde(default)]
    pub id: String,
    /// Call type (usually `"function"`).
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Function payload.
    #[serde(default)]
    pub function: FunctionCall,
}

/// One chat message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Author role.
    #[serde(default)]
    pub role: Role,
    /// Text content.
    #[serde(default)]
    pub content: String,
    /// Tool call id this message answers.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_id: String,
    /// Tool name this message answers.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_name: String,
    /// Tool calls requested by this message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    /// A message with the given role and content.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            ..Self::default()
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// One response choice.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    /// Choice index.
    #[serde(default)]
    pub index: u32,
    /// Complete message (non-streaming).
    #[serde(default)]
    pub message: Message,
    /// Incremental message (streaming).
    #[serde(default)]
    pub delta: Message,
    /// Why generation stopped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Error reported by the model API.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseError {
    /// Error message.
    #[serde(default)]
    pub message: String,
    /// Error type.
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// A model response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Response id.
    #[serde(default)]
    pub id: String,
    /// Object type.
    #[serde(default)]
    pub object: String,
    /// Creation time (unix seconds).
    #[serde(default)]
    pub created: i64,
    /// Model that produced the response.
    #[serde(default)]
    pub model: String,
    /// Choices.
    #[serde(default)]
    pub choices: Vec<Choice>,
    /// Streaming chunk rather than a complete message.
    #[serde(default)]
    pub is_partial: bool,
    /// Final chunk of a stream.
    #[serde(default)]
    pub done: bool,
    /// API error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    /// A complete single-choice response carrying `message`.
    pub fn from_message(message: Message) -> Self {
        Self {
            choices: vec![Choice {
                message,
                ..Choice::default()
            }],
            done: true,
            ..Self::default()
        }
    }

    /// Whether the response carries something worth storing: a tool call, a
    /// tool result, or non-empty message/delta content in any choice.
    pub fn is_valid_content(&self) -> bool {
        if self.is_tool_call_response() || self.is_tool_result_response() {
            return true;
        }
        self.choices
            .iter()
            .any(|c| !c.message.content.is_empty() || !c.delta.content.is_empty())
    }

    /// Whether any choice was authored by the user.
    pub fn is_user_message(&self) -> bool {
        self.choices
            .iter()
            .any(|c| c.message.role == Role::User || c.delta.role == Role::User)
    }

    /// Whether the first choice requests tool calls.
    pub fn is_tool_call_response(&self) -> bool {
        self.choices
            .first()
            .is_some_and(|c| !c.message.tool_calls.is_empty() || !c.delta.tool_calls.is_empty())
    }

    /// Whether the first choice is a tool result.
    pub fn is_tool_result_response(&self) -> bool {
        self.choices
            .first()
            .is_some_and(|c| !c.message.tool_id.is_empty() || !c.delta.tool_id.is_empty())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
