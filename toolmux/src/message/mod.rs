//! Gateway-local message shapes for the two LLM surfaces.
//!
//! The Chat form mirrors chat-completions (`role`/`content`/`tool_calls`);
//! the Responses form is item-based (`function_call` / `function_call_output`).
//! Both paths pass messages through unchanged except that tool results always
//! carry the `call_id` they were invoked with.

mod chat;
mod responses;

pub use chat::{
    ChatChoice, ChatFunctionCall, ChatMessage, ChatRequest, ChatResponse, ChatRole, ChatToolCall,
};
pub use responses::{ResponsesItem, ResponsesRequest, ResponsesResponse};

/// Finish reason when the loop completed with a final text answer.
pub const FINISH_STOP: &str = "stop";
/// Finish reason when tool calls remain for the caller to approve or resume.
pub const FINISH_TOOL_CALLS: &str = "tool_calls";
