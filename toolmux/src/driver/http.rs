//! HTTP driver: one POST per JSON-RPC call against a streamable-HTTP MCP
//! endpoint.
//!
//! No persistent session beyond HTTP keep-alive; the connection pool lives in
//! the shared `reqwest::Client`. The server may answer a POST either as plain
//! JSON or as an SSE-framed body, and may issue an `Mcp-Session-Id` on
//! initialize which is echoed on subsequent requests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use mcp_wire::{
    parse_call_tool_result, parse_json_rpc_body, parse_list_tools_result, NotificationMessage,
    RequestMessage, ResultMessage, ToolOutput, ToolSchema,
};

use super::{ConnectionDriver, DriverError, CLIENT_INFO_NAME, MCP_PROTOCOL_VERSION};
use crate::context::ExecContext;

const SESSION_HEADER: &str = "Mcp-Session-Id";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// MCP client over streamable HTTP.
pub struct HttpDriver {
    client: reqwest::Client,
    url: String,
    headers: Vec<(String, String)>,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
}

impl HttpDriver {
    pub fn new(url: String, headers: Vec<(String, String)>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            headers,
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_request_id(&self) -> String {
        format!("tm-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn apply_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req = req
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .header("MCP-Protocol-Version", MCP_PROTOCOL_VERSION);
        for (key, value) in &self.headers {
            req = req.header(key.as_str(), value.as_str());
        }
        if let Ok(guard) = self.session_id.lock() {
            if let Some(ref sid) = *guard {
                req = req.header(SESSION_HEADER, sid.as_str());
            }
        }
        req
    }

    /// POSTs one JSON-RPC request, racing context cancellation when given.
    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
        ctx: Option<&ExecContext>,
    ) -> Result<ResultMessage, DriverError> {
        let id = self.next_request_id();
        let request = RequestMessage::new(id.as_str(), method, params);
        let body =
            serde_json::to_vec(&request).map_err(|e| DriverError::Transport(e.to_string()))?;
        let req = self
            .apply_headers(self.client.post(&self.url))
            .timeout(timeout)
            .body(body);

        let send = async {
            let resp = req.send().await.map_err(|e| {
                if e.is_timeout() {
                    DriverError::Timeout(timeout)
                } else {
                    DriverError::Transport(e.to_string())
                }
            })?;
            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(DriverError::Transport(format!(
                    "{} HTTP {}: {}",
                    method,
                    status,
                    if text.is_empty() { "no body" } else { &text }
                )));
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
            parse_json_rpc_body(&text, is_sse, &id)
                .map_err(|e| DriverError::Transport(e.to_string()))
        };

        match ctx {
            Some(ctx) => tokio::select! {
                _ = ctx.cancelled() => Err(DriverError::Cancelled("context cancelled".into())),
                result = send => result,
            },
            None => send.await,
        }
    }

    async fn post_notification(&self, method: &str) -> Result<(), DriverError> {
        let note = NotificationMessage::new(method, Some(json!({})));
        let body = serde_json::to_vec(&note).map_err(|e| DriverError::Transport(e.to_string()))?;
        let resp = self
            .apply_headers(self.client.post(&self.url))
            .timeout(CONNECT_TIMEOUT)
            .body(body)
            .send()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        let status = resp.status();
        if status != reqwest::StatusCode::ACCEPTED && !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(DriverError::Transport(format!(
                "{} HTTP {}: {}",
                method,
                status,
                if text.is_empty() { "no body" } else { &text }
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectionDriver for HttpDriver {
    async fn connect(&self) -> Result<(), DriverError> {
        let params = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "clientInfo": {
                "name": CLIENT_INFO_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let id = self.next_request_id();
        let request = RequestMessage::new(id.as_str(), "initialize", params);
        let body =
            serde_json::to_vec(&request).map_err(|e| DriverError::Transport(e.to_string()))?;
        let resp = self
            .apply_headers(self.client.post(&self.url))
            .timeout(CONNECT_TIMEOUT)
            .body(body)
            .send()
            .await
            .map_err(|e| DriverError::Connect(e.to_string()))?;

        let status = resp.status();
        if let Some(sid) = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            debug!(session_id = %sid, url = %self.url, "http: captured session id");
            if let Ok(mut guard) = self.session_id.lock() {
                *guard = Some(sid.to_string());
            }
        }
        // Some servers acknowledge initialize with 202 and no body; treat
        // that as an already-initialized session.
        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(DriverError::Connect(format!(
                "initialize HTTP {}: {}",
                status,
                if text.is_empty() { "no body" } else { &text }
            )));
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
            .map_err(|e| DriverError::Connect(e.to_string()))?;
        let result = parse_json_rpc_body(&text, is_sse, &id)
            .map_err(|e| DriverError::Connect(format!("initialize: {}", e)))?;
        if let Some(err) = result.error {
            return Err(DriverError::Connect(err.message));
        }

        self.post_notification("notifications/initialized").await
    }

    async fn close(&self) {
        if let Ok(mut guard) = self.session_id.lock() {
            *guard = None;
        }
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
