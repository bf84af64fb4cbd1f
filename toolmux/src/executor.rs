//! Single tool invocation: resolve, filter, bound, normalize.
//!
//! The executor resolves a visible tool name through the registry (meta-tools
//! first when code mode is active), enforces the per-call time budget
//! `min(context deadline, tool_execution_timeout)`, races cancellation of
//! both the request context and the owning client, and normalizes the result
//! into the Chat or Responses tool-message shape with the originating call
//! id. Tool-reported failures surface as [`ToolCallError::Tool`] with the
//! message preserved verbatim.

use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::debug;

use crate::codemode::{self, CodeMode};
use crate::config::{ClientState, ToolManagerConfig};
use crate::context::ExecContext;
use crate::driver::DriverError;
use crate::error::ToolCallError;
use crate::message::{ChatMessage, ChatToolCall, ResponsesItem};
use crate::registry::ToolRegistry;

/// Executes single tool calls against the registry.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    config: Arc<RwLock<ToolManagerConfig>>,
    code_mode: Option<Arc<CodeMode>>,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        config: Arc<RwLock<ToolManagerConfig>>,
        code_mode: Option<Arc<CodeMode>>,
    ) -> Self {
        Self {
            registry,
            config,
            code_mode,
        }
    }

    fn parse_arguments(arguments_json: &str) -> Result<Value, ToolCallError> {
        let trimmed = arguments_json.trim();
        if trimmed.is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        let value: Value = serde_json::from_str(trimmed)
            .map_err(|e| ToolCallError::Argument(format!("arguments are not valid JSON: {}", e)))?;
        if !value.is_object() && !value.is_null() {
            return Err(ToolCallError::Argument(
                "arguments must be a JSON object".into(),
            ));
        }
        Ok(value)
    }

    async fn execute_meta(
        &self,
        ctx: &ExecContext,
        code_mode: &CodeMode,
        tool_name: &str,
        args: &Value,
    ) -> Result<String, ToolCallError> {
        match tool_name {
            codemode::META_LIST_TOOL_FILES => Ok(code_mode.list_tool_files(ctx)),
            codemode::META_READ_TOOL_FILE => {
                let file_name = args
                    .get("fileName")
                    .and_then(|f| f.as_str())
                    .ok_or_else(|| {
                        ToolCallError::Argument("readToolFile requires 'fileName'".into())
                    })?;
                code_mode.read_tool_file(ctx, file_name)
            }
            codemode::META_EXECUTE_TOOL_CODE => {
                let code = args.get("code").and_then(|c| c.as_str()).ok_or_else(|| {
                    ToolCallError::Argument("executeToolCode requires 'code'".into())
                })?;
                Ok(code_mode.execute_tool_code(ctx, code).await)
            }
            _ => Err(ToolCallError::not_found(tool_name)),
        }
    }

    /// Executes one tool call and returns its textual result.
    pub async fn execute_raw(
        &self,
        ctx: &ExecContext,
        tool_name: &str,
        arguments_json: &str,
        call_id: &str,
    ) -> Result<String, ToolCallError> {
        if ctx.is_cancelled() {
            return Err(ToolCallError::Cancelled("context cancelled".into()));
        }
        let args = Self::parse_arguments(arguments_json)?;

        if codemode::is_meta_tool(tool_name) {
            if let Some(ref code_mode) = self.code_mode {
                if self.registry.has_code_mode_clients(ctx) {
                    return self.execute_meta(ctx, code_mode, tool_name, &args).await;
                }
            }
            return Err(ToolCallError::not_found(tool_name));
        }

        let (handle, bare_name) = self.registry.lookup(tool_name, ctx)?;
        if handle.state() != ClientState::Connected {
            return Err(ToolCallError::Transport(format!(
                "client '{}' is not connected",
                handle.name()
            )));
        }

        let timeout_cap = self
            .config
            .read()
            .map(|c| c.tool_execution_timeout)
            .unwrap_or_default();
        let budget = ctx.remaining(timeout_cap);
        if budget.is_zero() {
            return Err(ToolCallError::Timeout(format!(
                "no time budget left for tool '{}'",
                tool_name
            )));
        }

        debug!(
            tool = tool_name,
            call_id,
            client = %handle.name(),
            budget_ms = budget.as_millis() as u64,
            "executing tool call"
        );

        let driver = handle.driver();
        let result = tokio::select! {
            _ = ctx.cancelled() => Err(ToolCallError::Cancelled("context cancelled".into())),
            _ = handle.cancel.cancelled() => Err(ToolCallError::Cancelled(format!(
                "client '{}' was removed",
                handle.name()
            ))),
            outcome = tokio::time::timeout(budget, driver.call_tool(&bare_name, args, ctx)) => {
                match outcome {
                    Err(_) => Err(ToolCallError::Timeout(format!(
                        "tool '{}' exceeded {:?}",
                        tool_name, budget
                    ))),
                    Ok(Err(driver_err)) => Err(map_driver_error(driver_err, budget)),
                    Ok(Ok(output)) => {
                        if output.is_error {
                            Err(ToolCallError::Tool(output.text))
                        } else {
                            Ok(output.text)
                        }
                    }
                }
            }
        };
        result
    }

    /// Chat form: executes and wraps into a `role=tool` message carrying the
    /// same call id.
    pub async fn execute_chat(
        &self,
        ctx: &ExecContext,
        call: &ChatToolCall,
    ) -> Result<ChatMessage, ToolCallError> {
        let text = self
            .execute_raw(ctx, &call.function.name, &call.function.arguments, &call.id)
            .await?;
        Ok(ChatMessage::tool_result(call.id.clone(), text))
    }

    /// Responses form: executes a `function_call` item and wraps the result
    /// into a `function_call_output` item with the same call id.
    pub async fn execute_responses(
        &self,
        ctx: &ExecContext,
        item: &ResponsesItem,
    ) -> Result<ResponsesItem, ToolCallError> {
        let ResponsesItem::FunctionCall {
            call_id,
            name,
            arguments,
        } = item
        else {
            return Err(ToolCallError::Argument(
                "expected a function_call item".into(),
            ));
        };
        let text = self.execute_raw(ctx, name, arguments, call_id).await?;
        Ok(ResponsesItem::function_call_output(call_id.clone(), text))
    }
}

fn map_driver_error(err: DriverError, budget: std::time::Duration) -> ToolCallError {
    match err {
        DriverError::Cancelled(cause) => ToolCallError::Cancelled(cause),
        DriverError::Timeout(_) => {
            ToolCallError::Timeout(format!("driver call exceeded {:?}", budget))
        }
        // JSON-RPC level failures carry the tool's own message.
        DriverError::Rpc(message) => ToolCallError::Tool(message),
        DriverError::Transport(message) => ToolCallError::Transport(message),
        DriverError::Connect(message) => ToolCallError::Transport(message),
        DriverError::Closed => ToolCallError::Transport("connection closed".into()),
    }
}
