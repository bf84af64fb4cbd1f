//! Injected LLM caller types.
//!
//! The subsystem never talks to an LLM provider itself; the embedding gateway
//! injects a caller per surface. Both callers receive the accumulated history
//! as a fresh request value and return the next response.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::ToolCallError;
use crate::message::{ChatRequest, ChatResponse, ResponsesRequest, ResponsesResponse};

/// Chat-surface LLM caller. Failures abort the agent loop.
pub type ChatLlmCaller =
    Arc<dyn Fn(ChatRequest) -> BoxFuture<'static, Result<ChatResponse, ToolCallError>> + Send + Sync>;

/// Responses-surface LLM caller. Failures abort the agent loop.
pub type ResponsesLlmCaller = Arc<
    dyn Fn(ResponsesRequest) -> BoxFuture<'static, Result<ResponsesResponse, ToolCallError>>
        + Send
        + Sync,
>;

/// Wraps an async closure into a [`ChatLlmCaller`].
pub fn chat_caller<F, Fut>(f: F) -> ChatLlmCaller
where
    F: Fn(ChatRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ChatResponse, ToolCallError>> + Send + 'static,
{
    Arc::new(move |req| Box::pin(f(req)))
}

/// Wraps an async closure into a [`ResponsesLlmCaller`].
pub fn responses_caller<F, Fut>(f: F) -> ResponsesLlmCaller
where
    F: Fn(ResponsesRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ResponsesResponse, ToolCallError>> + Send + 'static,
{
    Arc::new(move |req| Box::pin(f(req)))
}
