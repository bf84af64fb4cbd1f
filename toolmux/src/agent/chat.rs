//! Agent loop over the chat surface.

use futures::future::join_all;
use tracing::debug;

use crate::context::ExecContext;
use crate::error::ToolCallError;
use crate::llm::ChatLlmCaller;
use crate::message::{
    ChatMessage, ChatRequest, ChatResponse, ChatToolCall, FINISH_STOP, FINISH_TOOL_CALLS,
};

use super::{AutoCheck, ChatToolExec};

/// Runs the agent loop for a chat request.
///
/// `initial` is the LLM response the caller already holds; `max_depth` bounds
/// the number of follow-up LLM calls. The returned response is either the
/// LLM's final text response, or a response with finish reason `tool_calls`
/// carrying the calls that still need approval.
pub async fn run_chat_agent(
    ctx: &ExecContext,
    req: &ChatRequest,
    initial: ChatResponse,
    llm: &ChatLlmCaller,
    exec: &ChatToolExec,
    is_auto: &AutoCheck,
    max_depth: usize,
) -> Result<ChatResponse, ToolCallError> {
    let mut history = req.messages.clone();
    let mut response = initial;
    let mut depth = 0usize;

    loop {
        if ctx.is_cancelled() {
            return Err(ToolCallError::Cancelled("agent loop cancelled".into()));
        }
        // The agent inherits the caller's deadline; running past it is a
        // cancellation, not a per-call timeout.
        if ctx.deadline().is_some_and(|d| std::time::Instant::now() >= d) {
            return Err(ToolCallError::Cancelled("agent deadline exceeded".into()));
        }

        let calls: Vec<ChatToolCall> = response.tool_calls().to_vec();
        if calls.is_empty() {
            // Nothing left to execute; hand the response back unchanged.
            return Ok(response);
        }
        if depth >= max_depth {
            debug!(depth, "agent loop: depth cap reached with pending tool calls");
            response.set_finish_reason(FINISH_TOOL_CALLS);
            return Ok(response);
        }

        let (auto, manual): (Vec<ChatToolCall>, Vec<ChatToolCall>) = calls
            .into_iter()
            .partition(|call| is_auto(&call.function.name));
        if auto.is_empty() {
            response.set_finish_reason(FINISH_TOOL_CALLS);
            return Ok(response);
        }

        // All auto calls run in parallel; join_all keeps the order of the
        // originating tool_calls array regardless of completion order.
        let executions = auto.iter().map(|call| {
            let exec = exec.clone();
            let ctx = ctx.child();
            let call = call.clone();
            async move {
                match exec(ctx, call.clone()).await {
                    Ok(message) => Ok(message),
                    Err(err) if err.is_recoverable() => {
                        debug!(tool = %call.function.name, error = %err, "tool call failed; surfacing to LLM");
                        Ok(ChatMessage::tool_result(call.id.clone(), err.to_string()))
                    }
                    Err(err) => Err(err),
                }
            }
        });
        let results: Vec<ChatMessage> = join_all(executions)
            .await
            .into_iter()
            .collect::<Result<_, _>>()?;

        let assistant = response
            .choices
            .first()
            .map(|choice| choice.message.clone())
            .unwrap_or_else(|| ChatMessage::assistant_with_calls(None, Vec::new()));
        history.push(assistant);
        history.extend(results.iter().cloned());

        if !manual.is_empty() {
            // Mixed turn: auto results are delivered as content, the manual
            // calls ride along for the caller to approve.
            let content: Vec<String> = results
                .iter()
                .filter_map(|message| message.content.clone())
                .collect();
            let message = ChatMessage::assistant_with_calls(Some(content.join("\n")), manual);
            return Ok(ChatResponse::single(message, Some(FINISH_STOP.to_string())));
        }

        depth += 1;
        debug!(depth, executed = results.len(), "agent loop: follow-up LLM call");
        response = llm(ChatRequest {
            messages: history.clone(),
            model: req.model.clone(),
        })
        .await
        .map_err(|err| match err {
            err @ ToolCallError::Llm(_) => err,
            other => ToolCallError::Llm(other.to_string()),
        })?;
    }
}
