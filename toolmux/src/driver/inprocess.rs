//! In-process driver: direct dispatch to registered handlers.
//!
//! Backs the reserved internal client and any user-configured `InProcess`
//! client. Arguments stay as `serde_json::Value` end to end; there is no
//! serialization on the hot path.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::watch;

use mcp_wire::{ToolOutput, ToolSchema};

use super::{ConnectionDriver, DriverError, InProcessHandler};
use crate::context::ExecContext;
use crate::error::ManagerError;

struct RegisteredTool {
    schema: ToolSchema,
    handler: InProcessHandler,
}

/// Driver whose tools are plain functions registered in this process.
pub struct InProcessDriver {
    tools: DashMap<String, RegisteredTool>,
    /// Test hook: when set to true, `ping` fails. Lets health-monitor tests
    /// drive state transitions without a subprocess.
    ping_healthy: watch::Sender<bool>,
}

impl InProcessDriver {
    pub fn new() -> Self {
        let (ping_healthy, _) = watch::channel(true);
        Self {
            tools: DashMap::new(),
            ping_healthy,
        }
    }

    /// Registers a tool; the name must be unique within this driver.
    pub fn register(
        &self,
        schema: ToolSchema,
        handler: InProcessHandler,
    ) -> Result<(), ManagerError> {
        let name = schema.name.clone();
        match self.tools.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(ManagerError::DuplicateTool(name)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(RegisteredTool { schema, handler });
                Ok(())
            }
        }
    }

    /// Flips ping health; `false` makes subsequent pings fail.
    pub fn set_ping_healthy(&self, healthy: bool) {
        let _ = self.ping_healthy.send(healthy);
    }
}

impl Default for InProcessDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionDriver for InProcessDriver {
    async fn connect(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn close(&self) {}

    async fn list_tools(&self) -> Result<Vec<ToolSchema>, DriverError> {
        Ok(self.tools.iter().map(|t| t.schema.clone()).collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        args: Value,
        ctx: &ExecContext,
    ) -> Result<ToolOutput, DriverError> {
        let handler = {
            let tool = self
                .tools
                .get(name)
                .ok_or_else(|| DriverError::Rpc(format!("unknown tool: {}", name)))?;
            tool.handler.clone()
        };

        tokio::select! {
            _ = ctx.cancelled() => Err(DriverError::Cancelled("context cancelled".into())),
            result = (handler)(args) => Ok(match result {
                Ok(text) => ToolOutput::text(text),
                Err(message) => ToolOutput::error(message),
            }),
        }
    }

    async fn ping(&self) -> Result<(), DriverError> {
        if *self.ping_healthy.borrow() {
            Ok(())
        } else {
            Err(DriverError::Transport("ping failed".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn echo_handler() -> InProcessHandler {
        Arc::new(|args: Value| {
            Box::pin(async move {
                let message = args
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or_default()
                    .to_string();
                Ok(message)
            })
        })
    }

    #[tokio::test]
    async fn registered_tool_is_listed_and_callable() {
        let driver = InProcessDriver::new();
        driver
            .register(
                ToolSchema::new("echo", Some("Echo input".into()), json!({"type": "object"})),
                echo_handler(),
            )
            .unwrap();

        let tools = driver.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");

        let out = driver
            .call_tool("echo", json!({"message": "hi"}), &ExecContext::new())
            .await
            .unwrap();
        assert_eq!(out.text, "hi");
        assert!(!out.is_error);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let driver = InProcessDriver::new();
        let schema = ToolSchema::new("echo", None, json!({}));
        driver.register(schema.clone(), echo_handler()).unwrap();
        let err = driver.register(schema, echo_handler()).unwrap_err();
        assert!(matches!(err, ManagerError::DuplicateTool(name) if name == "echo"));
    }

    #[tokio::test]
    async fn handler_error_becomes_tool_error_output() {
        let driver = InProcessDriver::new();
        driver
            .register(
                ToolSchema::new("div", None, json!({})),
                Arc::new(|_| Box::pin(async { Err("division by zero".to_string()) })),
            )
            .unwrap();

        let out = driver
            .call_tool("div", json!({}), &ExecContext::new())
            .await
            .unwrap();
        assert!(out.is_error);
        assert_eq!(out.text, "division by zero");
    }

    #[tokio::test]
    async fn cancellation_interrupts_running_handler() {
        let driver = InProcessDriver::new();
        driver
            .register(
                ToolSchema::new("sleep", None, json!({})),
                Arc::new(|_| {
                    Box::pin(async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok("done".to_string())
                    })
                }),
            )
            .unwrap();

        let ctx = ExecContext::new();
        let cancel = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let started = std::time::Instant::now();
        let err = driver
            .call_tool("sleep", json!({}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Cancelled(_)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn ping_follows_health_flag() {
        let driver = InProcessDriver::new();
        assert!(driver.ping().await.is_ok());
        driver.set_ping_healthy(false);
        assert!(driver.ping().await.is_err());
        driver.set_ping_healthy(true);
        assert!(driver.ping().await.is_ok());
    }
}
