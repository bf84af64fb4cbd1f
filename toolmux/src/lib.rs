//! # toolmux
//!
//! MCP tool-execution subsystem for an LLM gateway. Given an LLM response
//! that contains tool calls, toolmux routes each call to the right backend
//! client, executes tools (possibly in parallel), and drives the multi-turn
//! agent loop that feeds results back to the LLM. A code-mode surface lets
//! the LLM orchestrate many tool calls from one sandboxed code snippet with
//! typed bindings per server.
//!
//! ## Main modules
//!
//! - [`manager`]: [`ToolManager`] — client lifecycle (add/remove/edit/
//!   reconnect), health monitoring, and the public entry points
//!   (`execute_chat_mcp_tool`, `check_and_execute_agent_for_chat_request`, …).
//! - [`driver`]: [`ConnectionDriver`] and the stdio / HTTP / SSE /
//!   in-process transports.
//! - [`registry`]: [`ToolRegistry`] — per-client catalogs, `{client}-{tool}`
//!   name mangling, prefixed lookup.
//! - [`filter`]: intersectional allow-list engine; per-request overlays can
//!   only narrow the static client configuration.
//! - [`executor`]: [`ToolExecutor`] — single-call execution with timeout and
//!   cancellation, result normalization per surface.
//! - [`agent`]: the chat and responses agent loops.
//! - [`codemode`]: meta-tools (`executeToolCode`, `listToolFiles`,
//!   `readToolFile`), binding generation, the Rhai sandbox.
//! - [`message`]: gateway-local Chat and Responses message shapes.
//! - [`llm`]: injected LLM caller types.
//!
//! The LLM provider clients, gateway plumbing, and config loading live in
//! the embedding gateway; this crate only consumes an injected caller.

pub mod agent;
pub mod codemode;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod executor;
pub mod filter;
pub mod llm;
pub mod manager;
pub mod message;
pub mod registry;

pub use agent::{AutoCheck, ChatToolExec, ResponsesToolExec};
pub use codemode::{
    meta_tool_schemas, CodeMode, META_EXECUTE_TOOL_CODE, META_LIST_TOOL_FILES, META_READ_TOOL_FILE,
};
pub use config::{
    ClientConfig, ClientState, ConnectionConfig, ConnectionKind, ToolManagerConfig,
};
pub use context::ExecContext;
pub use driver::{
    build_driver, in_process_handler, ConnectionDriver, DriverError, DriverEvent, HttpDriver,
    InProcessDriver, InProcessHandler, SseDriver, StdioDriver,
};
pub use error::{ManagerError, ToolCallError};
pub use executor::ToolExecutor;
pub use llm::{chat_caller, responses_caller, ChatLlmCaller, ResponsesLlmCaller};
pub use manager::{ClientSnapshot, ToolManager, ToolManagerUpdate};
pub use message::{
    ChatChoice, ChatFunctionCall, ChatMessage, ChatRequest, ChatResponse, ChatRole, ChatToolCall,
    ResponsesItem, ResponsesRequest, ResponsesResponse, FINISH_STOP, FINISH_TOOL_CALLS,
};
pub use registry::{
    mangle_name, sanitize_name, ClientHandle, ToolRegistry, INTERNAL_CLIENT_ID,
    INTERNAL_CLIENT_NAME,
};

pub use mcp_wire::{ToolOutput, ToolSchema};
