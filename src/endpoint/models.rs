//! Request and response types exchanged with a model endpoint

use crate::history::{Part, Turn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declaration of a tool the model may call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
}

/// Sampling and framing options for one generation call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
}

impl GenerationConfig {
    /// Low-temperature config for deterministic housekeeping calls.
    pub fn deterministic(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
            top_p: Some(1.0),
            ..Self::default()
        }
    }
}

/// One generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub contents: Vec<Turn>,
    #[serde(default)]
    pub tools: Vec<ToolDeclaration>,
    #[serde(default)]
    pub config: GenerationConfig,
}

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Safety,
    Other,
}

/// Token accounting reported by the endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub prompt_token_count: usize,
    pub candidates_token_count: usize,
    pub total_token_count: usize,
}

/// A full response, or one chunk of a streamed response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub parts: Vec<Part>,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
    #[serde(default)]
    pub usage: Option<UsageMetadata>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part::text(text)],
            finish_reason: Some(FinishReason::Stop),
            usage: None,
        }
    }

    /// Concatenated text of the response, ignoring thoughts and tool calls.
    pub fn text_content(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }
}

/// Errors surfaced by a model endpoint
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl EndpointError {
    /// 429 and 5xx responses and connection failures are worth retrying.
    /// Every other 4xx, including region blocks, is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            EndpointError::Http { status, .. } => *status == 429 || (500..=599).contains(status),
            EndpointError::Network(_) => true,
            EndpointError::Cancelled | EndpointError::InvalidResponse(_) => false,
        }
    }
}
