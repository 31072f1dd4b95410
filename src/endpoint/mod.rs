//! Model endpoint abstraction
//!
//! The core never talks to a provider directly. Generation, streaming and
//! token counting go through [`ModelEndpoint`], implemented by the host.

pub mod models;
pub mod retry;
pub mod token_limits;

pub use models::{
    EndpointError, FinishReason, GenerateRequest, GenerationConfig, ModelResponse, ToolDeclaration,
    UsageMetadata,
};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use token_limits::{token_limit, DEFAULT_TOKEN_LIMIT};

use crate::history::Turn;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

/// Stream of response chunks
pub type ResponseStream = BoxStream<'static, Result<ModelResponse, EndpointError>>;

/// Model endpoint trait
#[async_trait]
pub trait ModelEndpoint: Send + Sync {
    /// Generate a complete response
    async fn generate(&self, request: GenerateRequest) -> Result<ModelResponse, EndpointError>;

    /// Generate a streamed response. Endpoints without streaming yield the
    /// full response as a single chunk.
    async fn generate_stream(&self, request: GenerateRequest) -> Result<ResponseStream, EndpointError> {
        let response = self.generate(request).await?;
        Ok(stream::once(async move { Ok(response) }).boxed())
    }

    /// Count tokens for a message list as the model would see it
    async fn count_tokens(&self, model: &str, contents: &[Turn]) -> Result<usize, EndpointError>;

    /// Context window of `model`
    fn token_limit(&self, model: &str) -> usize {
        token_limit(model)
    }
}
