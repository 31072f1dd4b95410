//! Model-backed summarization of a compacted history prefix

use super::prompts::{summarization_contents, SUMMARIZATION_SYSTEM_PROMPT};
use crate::endpoint::{
    retry_with_backoff, EndpointError, GenerateRequest, GenerationConfig, ModelEndpoint, RetryPolicy,
};
use crate::history::Turn;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Summarizer trait for different summarization strategies
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize text-only turns into one snapshot
    async fn summarize(&self, model: &str, turns: &[Turn]) -> Result<String, EndpointError>;
}

/// Summarizer that asks the model endpoint, with retries on transient errors
pub struct EndpointSummarizer {
    endpoint: Arc<dyn ModelEndpoint>,
    retry: RetryPolicy,
    temperature: f32,
}

impl EndpointSummarizer {
    pub fn new(endpoint: Arc<dyn ModelEndpoint>, retry: RetryPolicy, temperature: f32) -> Self {
        Self {
            endpoint,
            retry,
            temperature,
        }
    }

    fn build_request(&self, model: &str, turns: &[Turn]) -> GenerateRequest {
        let mut config = GenerationConfig::deterministic(self.temperature);
        config.system_instruction = Some(SUMMARIZATION_SYSTEM_PROMPT.to_string());
        GenerateRequest {
            model: model.to_string(),
            contents: summarization_contents(turns),
            tools: Vec::new(),
            config,
        }
    }
}

#[async_trait]
impl Summarizer for EndpointSummarizer {
    async fn summarize(&self, model: &str, turns: &[Turn]) -> Result<String, EndpointError> {
        if turns.is_empty() {
            return Ok(String::new());
        }

        debug!(model, turns = turns.len(), "Summarizing history prefix");
        let request = self.build_request(model, turns);
        let response = retry_with_backoff(&self.retry, "summarize", || {
            self.endpoint.generate(request.clone())
        })
        .await?;

        Ok(response.text_content().trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::mock::MockEndpoint;
    use crate::endpoint::ModelResponse;
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_request_is_deterministic_and_tool_free() {
        let endpoint = Arc::new(MockEndpoint::with_responses(vec![Ok(ModelResponse::text("  snapshot \n"))]));
        let summarizer = EndpointSummarizer::new(endpoint.clone(), policy(), 0.0);

        let summary = summarizer
            .summarize("gemini-2.5-pro", &[Turn::user_text("fix the bug")])
            .await
            .unwrap();
        assert_eq!(summary, "snapshot");

        let requests = endpoint.requests.lock().unwrap();
        assert_eq!(requests[0].config.temperature, Some(0.0));
        assert!(requests[0].tools.is_empty());
        assert!(requests[0].config.system_instruction.is_some());
        // user prefix, acknowledgment, instruction
        assert_eq!(requests[0].contents.len(), 3);
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let endpoint = Arc::new(MockEndpoint::with_responses(vec![
            Err(EndpointError::Http { status: 500, message: "oops".into() }),
            Ok(ModelResponse::text("snapshot")),
        ]));
        let summarizer = EndpointSummarizer::new(endpoint.clone(), policy(), 0.0);

        let summary = summarizer.summarize("m", &[Turn::user_text("x")]).await.unwrap();
        assert_eq!(summary, "snapshot");
        assert_eq!(endpoint.request_count(), 2);
    }

    #[tokio::test]
    async fn test_region_block_is_final() {
        let endpoint = Arc::new(MockEndpoint::with_responses(vec![Err(EndpointError::Http {
            status: 451,
            message: "unavailable in region".into(),
        })]));
        let summarizer = EndpointSummarizer::new(endpoint.clone(), policy(), 0.0);

        assert!(summarizer.summarize("m", &[Turn::user_text("x")]).await.is_err());
        assert_eq!(endpoint.request_count(), 1);
    }
}
