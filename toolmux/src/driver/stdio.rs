//! STDIO driver: subprocess with newline-delimited JSON-RPC over stdin/stdout.
//!
//! Requests are pipelined and keyed by JSON-RPC id: a reader task routes each
//! response line to the pending oneshot slot for its id, so several calls can
//! be in flight against one process. Child stderr is drained to logs so a
//! chatty server cannot block on a full pipe. Process exit or stdout EOF
//! fails all pending calls and reports `DriverEvent::Disconnected`.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use mcp_wire::{
    decode_line, parse_call_tool_result, parse_list_tools_result, InboundMessage,
    NotificationMessage, RequestMessage, ResultMessage, ToolOutput, ToolSchema,
};

use super::{
    ConnectionDriver, DriverError, DriverEvent, DriverEventSender, CLIENT_INFO_NAME,
    MCP_PROTOCOL_VERSION,
};
use crate::context::ExecContext;

/// Timeout for handshake and list/ping requests the driver issues itself.
const INTERNAL_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// Timeout for the liveness ping.
const PING_TIMEOUT: Duration = Duration::from_secs(5);

type PendingMap = Arc<DashMap<String, oneshot::Sender<ResultMessage>>>;

struct StdioConn {
    stdin: ChildStdin,
    child: Child,
    reader: JoinHandle<()>,
    stderr_drain: Option<JoinHandle<()>>,
}

/// MCP client over a spawned subprocess.
pub struct StdioDriver {
    command: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    events: DriverEventSender,
    conn: Mutex<Option<StdioConn>>,
    pending: PendingMap,
    next_id: AtomicU64,
}

impl StdioDriver {
    pub fn new(
        command: String,
        args: Vec<String>,
        env: Vec<(String, String)>,
        events: DriverEventSender,
    ) -> Self {
        Self {
            command,
            args,
            env,
            events,
            conn: Mutex::new(None),
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_request_id(&self) -> String {
        format!("tm-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Writes one frame to the child's stdin.
    async fn write_frame(&self, frame: String) -> Result<(), DriverError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(DriverError::Closed)?;
        conn.stdin
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        conn.stdin
            .write_all(b"\n")
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        conn.stdin
            .flush()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        Ok(())
    }

    /// Sends a request and waits for the matching response, racing the
    /// optional context's cancellation and the given timeout.
    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
        ctx: Option<&ExecContext>,
    ) -> Result<ResultMessage, DriverError> {
        let id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);

        // Entry is removed on every exit path so abandoned waits do not pile up.
        struct PendingGuard<'a> {
            pending: &'a PendingMap,
            id: &'a str,
        }
        impl Drop for PendingGuard<'_> {
            fn drop(&mut self) {
                self.pending.remove(self.id);
            }
        }
        let _guard = PendingGuard {
            pending: &self.pending,
            id: &id,
        };

        let request = RequestMessage::new(id.as_str(), method, params);
        let frame =
            serde_json::to_string(&request).map_err(|e| DriverError::Transport(e.to_string()))?;
        self.write_frame(frame).await?;

        let wait = async {
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(_)) => Err(DriverError::Closed),
                Err(_) => Err(DriverError::Timeout(timeout)),
            }
        };

        match ctx {
            Some(ctx) => tokio::select! {
                _ = ctx.cancelled() => Err(DriverError::Cancelled("context cancelled".into())),
                result = wait => result,
            },
            None => wait.await,
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), DriverError> {
        let note = NotificationMessage::new(method, params);
        let frame =
            serde_json::to_string(&note).map_err(|e| DriverError::Transport(e.to_string()))?;
        self.write_frame(frame).await
    }

    async fn initialize(&self) -> Result<(), DriverError> {
        let params = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "clientInfo": {
                "name": CLIENT_INFO_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let result = self
            .request("initialize", params, INTERNAL_REQUEST_TIMEOUT, None)
            .await?;
        if let Some(err) = result.error {
            return Err(DriverError::Rpc(err.message));
        }
        self.notify("notifications/initialized", Some(json!({})))
            .await
    }
}

#[async_trait]
impl ConnectionDriver for StdioDriver {
    async fn connect(&self) -> Result<(), DriverError> {
        self.close().await;

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| DriverError::Connect(format!("spawn {}: {}", self.command, e)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DriverError::Connect("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DriverError::Connect("child stdout unavailable".into()))?;
        let stderr = child.stderr.take();

        let pending = Arc::clone(&self.pending);
        let events = self.events.clone();
        let command = self.command.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match decode_line(&line) {
                            Ok(InboundMessage::Response(resp)) => {
                                let key = resp.id.as_key();
                                if let Some((_, tx)) = pending.remove(&key) {
                                    let _ = tx.send(resp);
                                } else {
                                    debug!(id = %key, "stdio: response for unknown request id");
                                }
                            }
                            Ok(InboundMessage::Notification(note)) => {
                                if note.method == "notifications/tools/list_changed" {
                                    let _ = events.send(DriverEvent::ToolsListChanged);
                                } else {
                                    debug!(method = %note.method, "stdio: ignoring notification");
                                }
                            }
                            Ok(InboundMessage::Request(req)) => {
                                debug!(method = %req.method, "stdio: ignoring server request");
                            }
                            Err(e) => {
                                warn!(%command, error = %e, "stdio: undecodable frame");
                            }
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
            // EOF: wake every pending waiter with Closed, tell the manager.
            pending.clear();
            let _ = events.send(DriverEvent::Disconnected);
        });

        let stderr_drain = stderr.map(|stderr| {
            let command = self.command.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(%command, "stdio server stderr: {}", line);
                }
            })
        });

        *self.conn.lock().await = Some(StdioConn {
            stdin,
            child,
            reader,
            stderr_drain,
        });

        self.initialize().await
    }

    async fn close(&self) {
        let conn = self.conn.lock().await.take();
        if let Some(mut conn) = conn {
            conn.reader.abort();
            if let Some(drain) = conn.stderr_drain {
                drain.abort();
            }
            if let Err(e) = conn.child.kill().await {
                debug!(error = %e, "stdio: kill after close");
            }
        }
        self.pending.clear();
    }

    async fn list_tools(&self) -> Result<Vec<ToolSchema>, DriverError> {
        let result = self
            .request("tools/list", json!({}), INTERNAL_REQUEST_TIMEOUT, None)
            .await?;
        parse_list_tools_result(result).map_err(|e| DriverError::Rpc(e.to_string()))
    }

    async fn call_tool(
        &self,
        name: &str,
        args: Value,
        ctx: &ExecContext,
    ) -> Result<ToolOutput, DriverError> {
        let params = json!({ "name": name, "arguments": args });
        let budget = ctx.remaining(Duration::from_secs(24 * 60 * 60));
        let result = self.request("tools/call", params, budget, Some(ctx)).await?;
        parse_call_tool_result(result).map_err(|e| DriverError::Rpc(e.to_string()))
    }

    async fn ping(&self) -> Result<(), DriverError> {
        let result = self.request("ping", json!({}), PING_TIMEOUT, None).await?;
        match result.error {
            Some(err) => Err(DriverError::Rpc(err.message)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn driver(command: &str) -> (StdioDriver, mpsc::UnboundedReceiver<DriverEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            StdioDriver::new(command.to_string(), vec![], vec![], tx),
            rx,
        )
    }

    #[tokio::test]
    async fn connect_fails_for_nonexistent_command() {
        let (driver, _rx) = driver("_nonexistent_command_that_does_not_exist_xyz_");
        let err = driver.connect().await.unwrap_err();
        assert!(matches!(err, DriverError::Connect(_)));
    }

    #[tokio::test]
    async fn call_on_closed_driver_returns_closed() {
        let (driver, _rx) = driver("true");
        let err = driver
            .call_tool("anything", json!({}), &ExecContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Closed));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (driver, _rx) = driver("true");
        driver.close().await;
        driver.close().await;
    }
}
