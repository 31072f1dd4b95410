//! Data models for conversation turns

use crate::error::ContextError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Result payload recorded for a call that never produced a real result.
pub const CANCELLATION_SENTINEL: &str = "[Operation Cancelled] The tool call was interrupted before it produced a result.";

/// Author of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ContextError;

    /// Parse a wire role. Anything but `user` or `model` is a contract bug.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "model" => Ok(Role::Model),
            other => Err(ContextError::ProtocolViolation(format!(
                "unknown turn role '{}': expected 'user' or 'model'",
                other
            ))),
        }
    }
}

/// A tool invocation emitted by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl FunctionCall {
    pub fn new(id: Option<&str>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.map(str::to_string),
            name: name.into(),
            args,
        }
    }
}

/// The result of a tool invocation, sent back on a user turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub response: Value,
}

impl FunctionResponse {
    pub fn new(id: Option<&str>, name: impl Into<String>, response: Value) -> Self {
        Self {
            id: id.map(str::to_string),
            name: name.into(),
            response,
        }
    }

    /// Build the synthetic result recorded for an interrupted call.
    pub fn cancelled(id: Option<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            response: serde_json::json!({ "error": CANCELLATION_SENTINEL }),
        }
    }

    /// Whether this response carries the cancellation sentinel rather than a real result.
    pub fn is_cancellation(&self) -> bool {
        match &self.response {
            Value::String(s) => s == CANCELLATION_SENTINEL,
            Value::Object(map) => {
                map.len() == 1
                    && map.get("error").and_then(Value::as_str) == Some(CANCELLATION_SENTINEL)
            }
            _ => false,
        }
    }
}

/// One semantic fragment of a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    /// Internal reasoning; never persisted to curated history nor sent upstream.
    Thought { text: String },
    FunctionCall(FunctionCall),
    FunctionResponse(FunctionResponse),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn thought(text: impl Into<String>) -> Self {
        Part::Thought { text: text.into() }
    }

    pub fn is_thought(&self) -> bool {
        matches!(self, Part::Thought { .. })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn as_function_call(&self) -> Option<&FunctionCall> {
        match self {
            Part::FunctionCall(call) => Some(call),
            _ => None,
        }
    }

    pub fn as_function_response(&self) -> Option<&FunctionResponse> {
        match self {
            Part::FunctionResponse(response) => Some(response),
            _ => None,
        }
    }

    /// A part is well formed when it carries content: text parts need text,
    /// tool parts need a name. Thoughts are always well formed.
    pub fn is_well_formed(&self) -> bool {
        match self {
            Part::Text { text } => !text.is_empty(),
            Part::Thought { .. } => true,
            Part::FunctionCall(call) => !call.name.is_empty(),
            Part::FunctionResponse(response) => !response.name.is_empty(),
        }
    }
}

/// One alternating unit of conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
    pub turn_id: String,
}

impl Turn {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            role,
            parts,
            turn_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn user(parts: Vec<Part>) -> Self {
        Self::new(Role::User, parts)
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self::new(Role::Model, parts)
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user(vec![Part::text(text)])
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self::model(vec![Part::text(text)])
    }

    /// Build a turn from a wire role string.
    pub fn from_wire(role: &str, parts: Vec<Part>) -> Result<Self, ContextError> {
        Ok(Self::new(role.parse()?, parts))
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn is_model(&self) -> bool {
        self.role == Role::Model
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn function_calls(&self) -> impl Iterator<Item = &FunctionCall> {
        self.parts.iter().filter_map(Part::as_function_call)
    }

    pub fn function_responses(&self) -> impl Iterator<Item = &FunctionResponse> {
        self.parts.iter().filter_map(Part::as_function_response)
    }

    pub fn has_function_calls(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::FunctionCall(_)))
    }

    pub fn has_function_responses(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::FunctionResponse(_)))
    }

    pub fn has_text(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, Part::Text { text } if !text.is_empty()))
    }

    /// Concatenated text of all `Text` parts.
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }

    /// Length of the JSON serialization of the turn's parts.
    pub fn serialized_len(&self) -> usize {
        serde_json::to_string(&self.parts)
            .map(|s| s.len())
            .unwrap_or_default()
    }
}

/// Concatenate runs of adjacent `Text` parts into one part.
pub fn merge_adjacent_text(parts: Vec<Part>) -> Vec<Part> {
    let mut merged: Vec<Part> = Vec::with_capacity(parts.len());
    for part in parts {
        if let (Some(Part::Text { text: last }), Part::Text { text }) = (merged.last_mut(), &part) {
            last.push_str(text);
            continue;
        }
        merged.push(part);
    }
    merged
}
