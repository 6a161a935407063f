//! Completion service interface and its OpenAI-compatible HTTP client.
//!
//! - `client`: `POST /chat/completions`, plain JSON and SSE streaming
//! - `sse`: event framing and chunk parsing for streamed responses
//! - `retry`: backoff policy for transient failures

use crate::error::ApiError;
use crate::types::{ChatRequest, ChatResponse, StreamChunk, ToolCallDelta};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};

mod client;
mod retry;
pub mod sse;

pub use client::ApiClient;
pub use retry::RetryPolicy;

/// Streamed completion: chunks in arrival order.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, ApiError>>;

/// Model API interface consumed by the chat orchestrator.
///
/// Tests provide scripted implementations; production uses [`ApiClient`].
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError>;

    /// Incremental delivery. The default replays [`complete`](Self::complete)
    /// as a single chunk.
    async fn stream(&self, request: &ChatRequest) -> Result<ChunkStream, ApiError> {
        let response = self.complete(request).await?;
        let chunks: Vec<Result<StreamChunk, ApiError>> =
            response_to_chunk(response).into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// Express a whole response as one stream chunk. `None` when it has no choice.
pub fn response_to_chunk(response: ChatResponse) -> Option<StreamChunk> {
    let choice = response.choices.into_iter().next()?;
    let tool_calls = choice
        .message
        .requested_calls()
        .iter()
        .enumerate()
        .map(|(index, call)| ToolCallDelta {
            index,
            id: Some(call.id.clone()),
            name: Some(call.function.name.clone()),
            arguments: Some(call.function.arguments.clone()),
        })
        .collect();
    Some(StreamChunk {
        content: choice.message.content,
        tool_calls,
        finish_reason: choice.finish_reason,
    })
}
