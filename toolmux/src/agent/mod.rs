//! Multi-turn agent loop.
//!
//! Drives LLM → tool calls → parallel execution → LLM until the response has
//! no tool calls, every outstanding call is manually gated, or the depth cap
//! is reached. The Chat and Responses paths are isomorphic; each lives in its
//! own submodule with the shared termination rules:
//!
//! - tool errors become tool-result messages (the LLM may recover),
//! - LLM failures and context cancellation abort the loop,
//! - `depth` counts LLM follow-up calls, so total LLM calls ≤ 1 + max depth,
//! - the caller's request object is never mutated; history accumulates in a
//!   fresh list.

mod chat;
mod responses;

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::context::ExecContext;
use crate::error::ToolCallError;
use crate::message::{ChatMessage, ChatToolCall, ResponsesItem};

pub use chat::run_chat_agent;
pub use responses::run_responses_agent;

/// Decides whether a visible tool name may run without approval.
pub type AutoCheck = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Tool-execution callback for the chat path. The default implementation is
/// the manager's executor; tests may inject their own.
pub type ChatToolExec = Arc<
    dyn Fn(ExecContext, ChatToolCall) -> BoxFuture<'static, Result<ChatMessage, ToolCallError>>
        + Send
        + Sync,
>;

/// Tool-execution callback for the responses path.
pub type ResponsesToolExec = Arc<
    dyn Fn(ExecContext, ResponsesItem) -> BoxFuture<'static, Result<ResponsesItem, ToolCallError>>
        + Send
        + Sync,
>;
