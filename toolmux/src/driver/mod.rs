//! Connection drivers: the transport-level MCP clients.
//!
//! Each transport implements [`ConnectionDriver`]; the manager dispatches
//! through the trait object and never branches on the transport kind on the
//! hot path. Drivers own their internal synchronization; the manager never
//! shares one driver across clients.

mod http;
mod inprocess;
mod sse;
mod stdio;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use mcp_wire::{ToolOutput, ToolSchema};

use crate::config::ConnectionConfig;
use crate::context::ExecContext;

pub use http::HttpDriver;
pub use inprocess::InProcessDriver;
pub use sse::SseDriver;
pub use stdio::StdioDriver;

/// MCP protocol version negotiated on initialize.
pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";
/// Client name reported in the initialize handshake.
pub const CLIENT_INFO_NAME: &str = "toolmux";

/// Transport-level failure.
#[derive(Debug, Error)]
pub enum DriverError {
    /// I/O failure, broken pipe, HTTP failure, malformed frame.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a JSON-RPC error.
    #[error("{0}")]
    Rpc(String),

    /// Subprocess could not be spawned or endpoint could not be reached.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The passed context was cancelled mid-call.
    #[error("call cancelled: {0}")]
    Cancelled(String),

    /// The call outlived its time budget.
    #[error("call timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// The driver was closed (or the peer went away) with the call pending.
    #[error("connection closed")]
    Closed,
}

/// Out-of-band events a driver reports to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverEvent {
    /// The transport dropped (process exit, pipe EOF, stream break).
    Disconnected,
    /// The server announced `notifications/tools/list_changed`.
    ToolsListChanged,
}

/// Sender half the manager hands to event-capable drivers.
pub type DriverEventSender = mpsc::UnboundedSender<DriverEvent>;

/// Handler signature for in-process tools: JSON arguments in, text out.
/// An `Err` is a tool error (LLM-visible), not a transport failure.
pub type InProcessHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<String, String>> + Send + Sync>;

/// Wraps an async closure into an [`InProcessHandler`].
pub fn in_process_handler<F, Fut>(f: F) -> InProcessHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String, String>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}

/// Capability set every transport provides.
///
/// All methods honor cancellation of the passed context: an interrupted call
/// returns promptly with `DriverError::Cancelled` without leaking tasks or
/// subprocess streams.
#[async_trait]
pub trait ConnectionDriver: Send + Sync {
    /// Establishes the transport and performs the MCP initialize handshake.
    async fn connect(&self) -> Result<(), DriverError>;

    /// Tears the transport down. Idempotent.
    async fn close(&self);

    /// Lists the tools the server advertises.
    async fn list_tools(&self) -> Result<Vec<ToolSchema>, DriverError>;

    /// Invokes one tool. The time budget is enforced by the caller via the
    /// context; drivers additionally abort on context cancellation.
    async fn call_tool(
        &self,
        name: &str,
        args: Value,
        ctx: &ExecContext,
    ) -> Result<ToolOutput, DriverError>;

    /// Liveness probe used by the health monitor.
    async fn ping(&self) -> Result<(), DriverError>;
}

/// Builds the driver for a connection config.
///
/// `InProcess` configs get a fresh empty driver; the manager wires the
/// reserved internal client to its shared [`InProcessDriver`] directly.
pub fn build_driver(
    config: &ConnectionConfig,
    events: DriverEventSender,
) -> Arc<dyn ConnectionDriver> {
    match config {
        ConnectionConfig::Stdio { command, args, env } => Arc::new(StdioDriver::new(
            command.clone(),
            args.clone(),
            env.clone(),
            events,
        )),
        ConnectionConfig::Http { url, headers } => {
            Arc::new(HttpDriver::new(url.clone(), headers.clone()))
        }
        ConnectionConfig::Sse { url, headers } => {
            Arc::new(SseDriver::new(url.clone(), headers.clone(), events))
        }
        ConnectionConfig::InProcess => Arc::new(InProcessDriver::new()),
    }
}
