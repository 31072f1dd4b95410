//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::json;
use session_context::endpoint::ResponseStream;
use session_context::{
    EndpointError, FunctionCall, FunctionResponse, GenerateRequest, ModelEndpoint, ModelResponse,
    Part, Turn,
};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// One scripted reply: the chunks to stream, then an optional error.
#[derive(Default, Clone)]
pub struct Script {
    pub chunks: Vec<ModelResponse>,
    pub error: Option<EndpointError>,
    /// Pause before each chunk
    pub delay: Duration,
}

impl Script {
    pub fn text(text: &str) -> Self {
        Self {
            chunks: vec![ModelResponse::text(text)],
            ..Self::default()
        }
    }

    pub fn chunks(texts: &[&str]) -> Self {
        Self {
            chunks: texts.iter().map(|t| ModelResponse::text(*t)).collect(),
            ..Self::default()
        }
    }
}

/// Endpoint that plays back scripted replies and counts tokens as bytes / 4.
#[derive(Default)]
pub struct ScriptedEndpoint {
    pub scripts: Mutex<VecDeque<Script>>,
    pub requests: Mutex<Vec<GenerateRequest>>,
    pub limit: Option<usize>,
}

impl ScriptedEndpoint {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_script(&self, request: GenerateRequest) -> Script {
        self.requests.lock().unwrap().push(request);
        self.scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::text("ok"))
    }
}

pub fn byte_tokens(contents: &[Turn]) -> usize {
    contents.iter().map(Turn::serialized_len).sum::<usize>().div_ceil(4)
}

#[async_trait]
impl ModelEndpoint for ScriptedEndpoint {
    async fn generate(&self, request: GenerateRequest) -> Result<ModelResponse, EndpointError> {
        let script = self.next_script(request);
        if let Some(error) = script.error {
            return Err(error);
        }
        let mut response = ModelResponse::default();
        for chunk in script.chunks {
            response.parts.extend(chunk.parts);
            response.finish_reason = chunk.finish_reason.or(response.finish_reason);
            response.usage = chunk.usage.or(response.usage);
        }
        Ok(response)
    }

    async fn generate_stream(&self, request: GenerateRequest) -> Result<ResponseStream, EndpointError> {
        let script = self.next_script(request);
        let delay = script.delay;
        let items = script
            .chunks
            .into_iter()
            .map(Ok)
            .chain(script.error.map(Err))
            .collect::<Vec<_>>();
        Ok(stream::iter(items)
            .then(move |item| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .boxed())
    }

    async fn count_tokens(&self, _model: &str, contents: &[Turn]) -> Result<usize, EndpointError> {
        Ok(byte_tokens(contents))
    }

    fn token_limit(&self, model: &str) -> usize {
        self.limit
            .unwrap_or_else(|| session_context::endpoint::token_limit(model))
    }
}

pub fn call(id: &str, name: &str) -> Part {
    Part::FunctionCall(FunctionCall::new(Some(id), name, json!({})))
}

pub fn response(id: &str, name: &str, output: &str) -> Part {
    Part::FunctionResponse(FunctionResponse::new(Some(id), name, json!({ "output": output })))
}

/// Alternating user/model text history of `len` turns, each turn padded to
/// roughly `bytes` bytes.
pub fn text_history(len: usize, bytes: usize) -> Vec<Turn> {
    (0..len)
        .map(|i| {
            let text = format!("turn {} {}", i, "x".repeat(bytes));
            if i % 2 == 0 {
                Turn::user_text(text)
            } else {
                Turn::model_text(text)
            }
        })
        .collect()
}
