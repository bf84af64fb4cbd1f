//! Agent loop over the responses surface.
//!
//! Isomorphic to the chat loop: tool calls are `function_call` items, results
//! are `function_call_output` items, and the depth and termination rules are
//! identical.

use futures::future::join_all;
use tracing::debug;

use crate::context::ExecContext;
use crate::error::ToolCallError;
use crate::llm::ResponsesLlmCaller;
use crate::message::{
    ResponsesItem, ResponsesRequest, ResponsesResponse, FINISH_STOP, FINISH_TOOL_CALLS,
};

use super::{AutoCheck, ResponsesToolExec};

fn call_name(item: &ResponsesItem) -> Option<&str> {
    match item {
        ResponsesItem::FunctionCall { name, .. } => Some(name),
        _ => None,
    }
}

fn call_id(item: &ResponsesItem) -> Option<&str> {
    match item {
        ResponsesItem::FunctionCall { call_id, .. } => Some(call_id),
        _ => None,
    }
}

/// Runs the agent loop for a responses request.
pub async fn run_responses_agent(
    ctx: &ExecContext,
    req: &ResponsesRequest,
    initial: ResponsesResponse,
    llm: &ResponsesLlmCaller,
    exec: &ResponsesToolExec,
    is_auto: &AutoCheck,
    max_depth: usize,
) -> Result<ResponsesResponse, ToolCallError> {
    let mut history = req.input.clone();
    let mut response = initial;
    let mut depth = 0usize;

    loop {
        if ctx.is_cancelled() {
            return Err(ToolCallError::Cancelled("agent loop cancelled".into()));
        }
        if ctx.deadline().is_some_and(|d| std::time::Instant::now() >= d) {
            return Err(ToolCallError::Cancelled("agent deadline exceeded".into()));
        }

        let calls: Vec<ResponsesItem> = response
            .output
            .iter()
            .filter(|item| matches!(item, ResponsesItem::FunctionCall { .. }))
            .cloned()
            .collect();
        if calls.is_empty() {
            return Ok(response);
        }
        if depth >= max_depth {
            debug!(depth, "agent loop: depth cap reached with pending function calls");
            response.finish_reason = Some(FINISH_TOOL_CALLS.to_string());
            return Ok(response);
        }

        let (auto, manual): (Vec<ResponsesItem>, Vec<ResponsesItem>) = calls
            .into_iter()
            .partition(|item| call_name(item).is_some_and(|name| is_auto(name)));
        if auto.is_empty() {
            response.finish_reason = Some(FINISH_TOOL_CALLS.to_string());
            return Ok(response);
        }

        let executions = auto.iter().map(|item| {
            let exec = exec.clone();
            let ctx = ctx.child();
            let item = item.clone();
            async move {
                match exec(ctx, item.clone()).await {
                    Ok(output) => Ok(output),
                    Err(err) if err.is_recoverable() => {
                        let id = call_id(&item).unwrap_or_default().to_string();
                        debug!(error = %err, "function call failed; surfacing to LLM");
                        Ok(ResponsesItem::function_call_output(id, err.to_string()))
                    }
                    Err(err) => Err(err),
                }
            }
        });
        let results: Vec<ResponsesItem> = join_all(executions)
            .await
            .into_iter()
            .collect::<Result<_, _>>()?;

        // The model's own output items (messages and function calls) go into
        // history first, then the outputs pair up with their call ids.
        history.extend(response.output.iter().cloned());
        history.extend(results.iter().cloned());

        if !manual.is_empty() {
            let content: Vec<String> = results
                .iter()
                .filter_map(|item| match item {
                    ResponsesItem::FunctionCallOutput { output, .. } => Some(output.clone()),
                    _ => None,
                })
                .collect();
            let mut output = vec![ResponsesItem::assistant(content.join("\n"))];
            output.extend(manual);
            let mut resp = ResponsesResponse::new(output);
            resp.finish_reason = Some(FINISH_STOP.to_string());
            return Ok(resp);
        }

        depth += 1;
        debug!(depth, executed = results.len(), "agent loop: follow-up LLM call");
        response = llm(ResponsesRequest {
            input: history.clone(),
            model: req.model.clone(),
        })
        .await
        .map_err(|err| match err {
            err @ ToolCallError::Llm(_) => err,
            other => ToolCallError::Llm(other.to_string()),
        })?;
    }
}
