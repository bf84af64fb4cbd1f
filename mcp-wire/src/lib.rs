//! # mcp-wire
//!
//! JSON-RPC 2.0 message types for the Model Context Protocol, shared by the
//! toolmux connection drivers (stdio, HTTP, SSE). Covers exactly what the
//! drivers need: request/notification/result frames, line decoding for stdio
//! framing, and parsing of `tools/list` / `tools/call` result payloads.
//!
//! Resources, prompts, and sampling are not modeled here.

mod message;
mod parse;
mod schema;

pub use message::{
    decode_line, ErrorObject, InboundMessage, MessageId, NotificationMessage, RequestMessage,
    ResultMessage, JSONRPC_VERSION,
};
pub use parse::{parse_call_tool_result, parse_json_rpc_body, parse_list_tools_result, ToolOutput};
pub use schema::ToolSchema;

use thiserror::Error;

/// Errors produced while decoding or interpreting wire frames.
#[derive(Debug, Error)]
pub enum WireError {
    /// Frame is not valid JSON or not a recognizable JSON-RPC message.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The peer answered with a JSON-RPC error object.
    #[error("{message}")]
    Rpc { code: i64, message: String },

    /// A result payload was missing a field the protocol requires.
    #[error("invalid result payload: {0}")]
    Payload(String),
}
