//! Parsers for MCP result payloads.
//!
//! `tools/list` yields a `tools` array of schemas; `tools/call` yields a
//! `content` array of blocks plus optional `structuredContent` and `isError`.
//! HTTP transports additionally need [`parse_json_rpc_body`], which accepts
//! either a plain JSON body or an SSE-framed body (`data:` lines), since
//! streamable-HTTP servers may answer a POST in either form.

use serde_json::Value;

use crate::message::{ErrorObject, MessageId, ResultMessage};
use crate::schema::ToolSchema;
use crate::WireError;

/// Normalized output of one `tools/call`.
///
/// `text` is the joined text blocks (or the serialized `structuredContent`
/// when the server sent no text). `is_error` mirrors the MCP `isError` flag:
/// the tool itself failed, as opposed to the transport.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub text: String,
    pub structured: Option<Value>,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            structured: None,
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            structured: None,
            is_error: true,
        }
    }
}

/// Parses a `tools/list` result into tool schemas.
pub fn parse_list_tools_result(result: ResultMessage) -> Result<Vec<ToolSchema>, WireError> {
    if let Some(err) = result.error {
        return Err(WireError::Rpc {
            code: err.code,
            message: err.message,
        });
    }
    let tools = result
        .result
        .and_then(|r| r.get("tools").cloned())
        .ok_or_else(|| WireError::Payload("no tools in tools/list result".into()))?;
    serde_json::from_value(tools).map_err(|e| WireError::Payload(format!("tools array: {}", e)))
}

/// Parses a `tools/call` result into [`ToolOutput`].
///
/// Joins all text blocks with newlines; falls back to `structuredContent`
/// serialized as JSON when no text block is present. An `isError: true`
/// result is returned as `Ok` with the flag set so callers can distinguish a
/// tool failure from a transport failure.
pub fn parse_call_tool_result(result: ResultMessage) -> Result<ToolOutput, WireError> {
    if let Some(err) = result.error {
        return Err(WireError::Rpc {
            code: err.code,
            message: err.message,
        });
    }
    let body = result
        .result
        .ok_or_else(|| WireError::Payload("no result in tools/call response".into()))?;

    let is_error = body
        .get("isError")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let structured = body.get("structuredContent").cloned();

    let mut parts = Vec::new();
    if let Some(blocks) = body.get("content").and_then(|c| c.as_array()) {
        for block in blocks {
            if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                if let Some(text) = block.get("text").and_then(|v| v.as_str()) {
                    parts.push(text);
                }
            }
        }
    }
    let mut text = parts.join("\n");
    if text.is_empty() {
        if let Some(ref s) = structured {
            text = serde_json::to_string(s).unwrap_or_default();
        }
    }

    Ok(ToolOutput {
        text,
        structured,
        is_error,
    })
}

/// Parses a JSON-RPC response out of an HTTP body.
///
/// When `is_sse` is set, the body is scanned as an SSE stream and the first
/// `data:` payload that decodes to a response (has `result` or `error`) wins.
/// The `fallback_id` is used when the server omits the id.
pub fn parse_json_rpc_body(
    body: &str,
    is_sse: bool,
    fallback_id: &str,
) -> Result<ResultMessage, WireError> {
    if !is_sse {
        return decode_response(body, fallback_id);
    }

    let mut data = String::new();
    for line in body.lines() {
        if let Some(payload) = line.strip_prefix("data:") {
            let payload = payload.trim_start();
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(payload);
            if let Ok(resp) = decode_response(&data, fallback_id) {
                return Ok(resp);
            }
        } else if line.trim().is_empty() {
            data.clear();
        }
    }
    Err(WireError::Payload(
        "SSE body carried no JSON-RPC response".into(),
    ))
}

fn decode_response(body: &str, fallback_id: &str) -> Result<ResultMessage, WireError> {
    #[derive(serde::Deserialize)]
    struct RawResponse {
        id: Option<MessageId>,
        result: Option<Value>,
        error: Option<ErrorObject>,
    }

    let raw: RawResponse =
        serde_json::from_str(body).map_err(|e| WireError::Malformed(e.to_string()))?;
    if raw.result.is_none() && raw.error.is_none() {
        return Err(WireError::Malformed(
            "body has neither result nor error".into(),
        ));
    }
    let id = raw.id.unwrap_or_else(|| MessageId::from(fallback_id));
    Ok(ResultMessage {
        id,
        result: raw.result,
        error: raw.error,
    })
}
