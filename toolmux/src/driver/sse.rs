//! SSE driver: persistent server-to-client event stream plus paired POST
//! endpoint for requests.
//!
//! On connect the server's stream announces an `endpoint` event naming the
//! POST URL; responses to posted requests normally arrive as `message`
//! events on the stream, routed to pending slots by JSON-RPC id (servers
//! that answer the POST body directly are handled too). A broken stream
//! fails all pending calls and reports `DriverEvent::Disconnected`; the
//! manager's backoff-driven reconnect loop then re-establishes the session,
//! which keeps one reconnect state machine instead of two.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use mcp_wire::{
    decode_line, parse_call_tool_result, parse_json_rpc_body, parse_list_tools_result,
    InboundMessage, NotificationMessage, RequestMessage, ResultMessage, ToolOutput, ToolSchema,
};

use super::{
    ConnectionDriver, DriverError, DriverEvent, DriverEventSender, CLIENT_INFO_NAME,
    MCP_PROTOCOL_VERSION,
};
use crate::context::ExecContext;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const PING_TIMEOUT: Duration = Duration::from_secs(5);

type PendingMap = Arc<DashMap<String, oneshot::Sender<ResultMessage>>>;

/// MCP client over the HTTP+SSE transport.
pub struct SseDriver {
    client: reqwest::Client,
    url: String,
    headers: Vec<(String, String)>,
    events: DriverEventSender,
    endpoint: Arc<std::sync::RwLock<Option<String>>>,
    stream_task: Mutex<Option<JoinHandle<()>>>,
    pending: PendingMap,
    next_id: AtomicU64,
}

impl SseDriver {
    pub fn new(url: String, headers: Vec<(String, String)>, events: DriverEventSender) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            headers,
            events,
            endpoint: Arc::new(std::sync::RwLock::new(None)),
            stream_task: Mutex::new(None),
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_request_id(&self) -> String {
        format!("tm-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Resolves the endpoint the server announced against the stream URL.
    fn resolve_endpoint(base: &str, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        // Relative endpoint: join with the origin of the stream URL.
        let origin = base
            .find("://")
            .and_then(|scheme_end| {
                base[scheme_end + 3..]
                    .find('/')
                    .map(|path_start| &base[..scheme_end + 3 + path_start])
            })
            .unwrap_or(base);
        if endpoint.starts_with('/') {
            format!("{}{}", origin, endpoint)
        } else {
            format!("{}/{}", origin, endpoint)
        }
    }

    /// POSTs one JSON-RPC frame to the announced endpoint. Returns the body
    /// text when the server answered the POST with content.
    async fn post_frame(&self, frame: Vec<u8>) -> Result<Option<(String, bool)>, DriverError> {
        let endpoint = self
            .endpoint
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or(DriverError::Closed)?;
        let mut req = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .timeout(CONNECT_TIMEOUT)
            .body(frame);
        for (key, value) in &self.headers {
            req = req.header(key.as_str(), value.as_str());
        }
        let resp = req
            .send()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(DriverError::Transport(format!(
                "POST HTTP {}: {}",
                status,
                if text.is_empty() { "no body" } else { &text }
            )));
        }
        if status == reqwest::StatusCode::ACCEPTED || status == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let is_sse = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.contains("text/event-stream"))
            .unwrap_or(false);
        let text = resp
            .text()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        if text.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some((text, is_sse)))
        }
    }

    /// Sends a request; the response may come back in the POST body or as a
    /// `message` event on the stream.
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
            serde_json::to_vec(&request).map_err(|e| DriverError::Transport(e.to_string()))?;
        if let Some((body, is_sse)) = self.post_frame(frame).await? {
            if let Ok(result) = parse_json_rpc_body(&body, is_sse, &id) {
                return Ok(result);
            }
        }

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

    async fn notify(&self, method: &str) -> Result<(), DriverError> {
        let note = NotificationMessage::new(method, Some(json!({})));
        let frame =
            serde_json::to_vec(&note).map_err(|e| DriverError::Transport(e.to_string()))?;
        self.post_frame(frame).await.map(|_| ())
    }
}

/// Dispatches one complete SSE event from the stream task.
fn dispatch_event(
    event_name: &str,
    data: &str,
    pending: &PendingMap,
    events: &DriverEventSender,
    endpoint_tx: &mut Option<oneshot::Sender<String>>,
    base_url: &str,
    endpoint_slot: &Arc<std::sync::RwLock<Option<String>>>,
) {
    match event_name {
        "endpoint" => {
            let resolved = SseDriver::resolve_endpoint(base_url, data.trim());
            debug!(endpoint = %resolved, "sse: endpoint announced");
            if let Ok(mut slot) = endpoint_slot.write() {
                *slot = Some(resolved.clone());
            }
            if let Some(tx) = endpoint_tx.take() {
                let _ = tx.send(resolved);
            }
        }
        // Default event name for JSON-RPC traffic is "message".
        _ => match decode_line(data) {
            Ok(InboundMessage::Response(resp)) => {
                let key = resp.id.as_key();
                if let Some((_, tx)) = pending.remove(&key) {
                    let _ = tx.send(resp);
                } else {
                    debug!(id = %key, "sse: response for unknown request id");
                }
            }
            Ok(InboundMessage::Notification(note)) => {
                if note.method == "notifications/tools/list_changed" {
                    let _ = events.send(DriverEvent::ToolsListChanged);
                }
            }
            Ok(InboundMessage::Request(req)) => {
                debug!(method = %req.method, "sse: ignoring server request");
            }
            Err(e) => warn!(error = %e, "sse: undecodable event data"),
        },
    }
}

#[async_trait]
impl ConnectionDriver for SseDriver {
    async fn connect(&self) -> Result<(), DriverError> {
        self.close().await;

        let mut req = self
            .client
            .get(&self.url)
            .header("Accept", "text/event-stream");
        for (key, value) in &self.headers {
            req = req.header(key.as_str(), value.as_str());
        }
        let resp = req
            .send()
            .await
            .map_err(|e| DriverError::Connect(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(DriverError::Connect(format!(
                "stream HTTP {}",
                resp.status()
            )));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let pending = Arc::clone(&self.pending);
        let events = self.events.clone();
        let base_url = self.url.clone();
        let slot_for_task = Arc::clone(&self.endpoint);

        let task = tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            let mut stream = resp.bytes_stream();
            let mut buffer = String::new();
            let mut event_name = String::new();
            let mut data = String::new();

            'stream: while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(error = %e, "sse: stream read failed");
                        break 'stream;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim_end_matches('\r').to_string();
                    buffer.drain(..=newline);
                    if let Some(name) = line.strip_prefix("event:") {
                        event_name = name.trim().to_string();
                    } else if let Some(payload) = line.strip_prefix("data:") {
                        if !data.is_empty() {
                            data.push('\n');
                        }
                        data.push_str(payload.trim_start());
                    } else if line.is_empty() && !data.is_empty() {
                        let name = if event_name.is_empty() {
                            "message"
                        } else {
                            &event_name
                        };
                        dispatch_event(
                            name,
                            &data,
                            &pending,
                            &events,
                            &mut endpoint_tx,
                            &base_url,
                            &slot_for_task,
                        );
                        event_name.clear();
                        data.clear();
                    }
                }
            }
            pending.clear();
            let _ = events.send(DriverEvent::Disconnected);
        });
        *self.stream_task.lock().await = Some(task);

        tokio::time::timeout(CONNECT_TIMEOUT, endpoint_rx)
            .await
            .map_err(|_| DriverError::Connect("no endpoint event within timeout".into()))?
            .map_err(|_| DriverError::Connect("stream closed before endpoint event".into()))?;

        let params = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "clientInfo": {
                "name": CLIENT_INFO_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let result = self
            .request("initialize", params, CONNECT_TIMEOUT, None)
            .await?;
        if let Some(err) = result.error {
            return Err(DriverError::Connect(err.message));
        }
        self.notify("notifications/initialized").await
    }

    async fn close(&self) {
        if let Some(task) = self.stream_task.lock().await.take() {
            task.abort();
        }
        if let Ok(mut endpoint) = self.endpoint.write() {
            *endpoint = None;
        }
        self.pending.clear();
    }

    async fn list_tools(&self) -> Result<Vec<ToolSchema>, DriverError> {
        let result = self
            .request("tools/list", json!({}), CONNECT_TIMEOUT, None)
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
