//! Client manager: lifecycle, health monitoring, and the public API.
//!
//! Each client gets two background tasks: an event listener (driver-reported
//! disconnects and tool-list changes) and a health loop that connects,
//! pings, and reconnects with capped exponential backoff. Three consecutive
//! ping failures mark a client `Disconnected`; while disconnected, the
//! health loop retries at 1 s, 2 s, 4 s, 8 s, then every 10 s, so a restored
//! server is back to `Connected` well inside the 20 s envelope. Removing a
//! client cancels only the in-flight calls routed to it and returns as soon
//! as teardown is scheduled.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mcp_wire::ToolSchema;

use crate::agent::{self, AutoCheck, ChatToolExec, ResponsesToolExec};
use crate::codemode::{self, CodeMode};
use crate::config::{
    ClientConfig, ClientState, ConnectionConfig, ConnectionKind, ToolManagerConfig,
};
use crate::context::ExecContext;
use crate::driver::{
    build_driver, ConnectionDriver, DriverEvent, DriverEventSender, InProcessDriver,
    InProcessHandler,
};
use crate::error::{ManagerError, ToolCallError};
use crate::executor::ToolExecutor;
use crate::filter;
use crate::llm::{ChatLlmCaller, ResponsesLlmCaller};
use crate::message::{
    ChatMessage, ChatRequest, ChatResponse, ChatToolCall, ResponsesItem, ResponsesRequest,
    ResponsesResponse,
};
use crate::registry::{ClientHandle, ToolRegistry, INTERNAL_CLIENT_ID, INTERNAL_CLIENT_NAME};

const PING_INTERVAL: Duration = Duration::from_secs(5);
const PING_FAILURE_THRESHOLD: u32 = 3;
const RECONNECT_BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const RECONNECT_BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Point-in-time view of one client, for observability.
#[derive(Debug, Clone, Serialize)]
pub struct ClientSnapshot {
    pub id: String,
    pub name: String,
    pub state: ClientState,
    pub connection: ConnectionKind,
    pub is_code_mode_client: bool,
    pub tools: Vec<String>,
    pub connected_at: Option<DateTime<Utc>>,
}

/// Partial update for [`ToolManagerConfig`].
#[derive(Debug, Clone, Default)]
pub struct ToolManagerUpdate {
    pub max_agent_depth: Option<usize>,
    pub tool_execution_timeout: Option<Duration>,
}

/// The MCP tool manager: client registry, executor, agent loop, code mode.
pub struct ToolManager {
    registry: Arc<ToolRegistry>,
    config: Arc<RwLock<ToolManagerConfig>>,
    executor: Arc<ToolExecutor>,
    local_driver: Arc<InProcessDriver>,
    events: DashMap<String, DriverEventSender>,
    kicks: DashMap<String, Arc<Notify>>,
    tasks: DashMap<String, Vec<JoinHandle<()>>>,
    root_cancel: CancellationToken,
}

impl ToolManager {
    pub fn new(config: ToolManagerConfig) -> Self {
        let registry = Arc::new(ToolRegistry::new());
        let config = Arc::new(RwLock::new(config));
        let code_mode = Arc::new(CodeMode::new(Arc::clone(&registry), Arc::clone(&config)));
        let executor = Arc::new(ToolExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&config),
            Some(code_mode),
        ));

        // The reserved internal client is always present and connected.
        let local_driver = Arc::new(InProcessDriver::new());
        let local_config = ClientConfig::new(
            INTERNAL_CLIENT_ID,
            INTERNAL_CLIENT_NAME,
            ConnectionConfig::InProcess,
        )
        .with_tools_to_execute(vec!["*".to_string()]);
        let local_handle = Arc::new(ClientHandle::new(
            local_config,
            Arc::clone(&local_driver) as Arc<dyn ConnectionDriver>,
        ));
        local_handle.set_state(ClientState::Connected);
        registry
            .insert(Arc::clone(&local_handle))
            .expect("fresh registry accepts the internal client");
        registry.claim_name(INTERNAL_CLIENT_NAME, INTERNAL_CLIENT_ID);

        Self {
            registry,
            config,
            executor,
            local_driver,
            events: DashMap::new(),
            kicks: DashMap::new(),
            tasks: DashMap::new(),
            root_cancel: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn config(&self) -> ToolManagerConfig {
        self.config
            .read()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Applies a partial config update.
    pub fn update_tool_manager_config(&self, update: ToolManagerUpdate) {
        if let Ok(mut config) = self.config.write() {
            if let Some(depth) = update.max_agent_depth {
                config.max_agent_depth = depth;
            }
            if let Some(timeout) = update.tool_execution_timeout {
                config.tool_execution_timeout = timeout;
            }
        }
    }

    /// Registers an in-process tool under the reserved internal client.
    pub async fn register_tool(
        &self,
        name: &str,
        description: &str,
        handler: InProcessHandler,
        schema: Value,
    ) -> Result<(), ManagerError> {
        self.local_driver.register(
            ToolSchema::new(name, Some(description.to_string()), schema),
            handler,
        )?;
        if let Some(handle) = self.registry.get(INTERNAL_CLIENT_ID) {
            let tools = self
                .local_driver
                .list_tools()
                .await
                .unwrap_or_default();
            handle.publish_tools(tools);
        }
        Ok(())
    }

    /// Adds a client and starts its async connect; returns before the client
    /// reaches `Connected`.
    pub fn add_client(&self, config: ClientConfig) -> Result<(), ManagerError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let driver = build_driver(&config.connection, events_tx.clone());
        self.add_client_inner(config, driver, events_tx, events_rx)
    }

    /// Adds a client backed by a caller-supplied driver, e.g. a custom
    /// in-process server. Lifecycle and health monitoring are identical to
    /// [`add_client`](Self::add_client).
    pub fn add_client_with_driver(
        &self,
        config: ClientConfig,
        driver: Arc<dyn ConnectionDriver>,
    ) -> Result<(), ManagerError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.add_client_inner(config, driver, events_tx, events_rx)
    }

    fn add_client_inner(
        &self,
        config: ClientConfig,
        driver: Arc<dyn ConnectionDriver>,
        events_tx: DriverEventSender,
        events_rx: mpsc::UnboundedReceiver<DriverEvent>,
    ) -> Result<(), ManagerError> {
        if config.id == INTERNAL_CLIENT_ID {
            return Err(ManagerError::ReservedClient(config.id));
        }
        let handle = Arc::new(ClientHandle::new(config, driver));
        let id = handle.id.clone();
        self.registry.insert(Arc::clone(&handle))?;

        let kick = Arc::new(Notify::new());
        self.events.insert(id.clone(), events_tx);
        self.kicks.insert(id.clone(), Arc::clone(&kick));

        let event_task = spawn_event_listener(Arc::clone(&handle), events_rx, Arc::clone(&kick));
        let health_task = spawn_health_loop(
            Arc::clone(&self.registry),
            Arc::clone(&handle),
            Arc::clone(&kick),
            self.root_cancel.clone(),
        );
        self.tasks.insert(id, vec![event_task, health_task]);
        Ok(())
    }

    /// Removes a client: cancels its in-flight calls, schedules driver
    /// teardown, and returns immediately.
    pub fn remove_client(&self, id: &str) -> Result<(), ManagerError> {
        if id == INTERNAL_CLIENT_ID {
            return Err(ManagerError::ReservedClient(id.to_string()));
        }
        let handle = self
            .registry
            .remove(id)
            .ok_or_else(|| ManagerError::UnknownClient(id.to_string()))?;
        handle.cancel.cancel();
        handle.set_state(ClientState::Disconnected);
        self.events.remove(id);
        self.kicks.remove(id);
        if let Some((_, tasks)) = self.tasks.remove(id) {
            for task in tasks {
                task.abort();
            }
        }
        let driver = handle.driver();
        tokio::spawn(async move {
            driver.close().await;
        });
        info!(client = id, "client removed");
        Ok(())
    }

    /// Edits a client in place. The connection type may not change; a
    /// transport-parameter change restarts the driver, filter and name
    /// changes apply without a restart. Rename preserves the id and the tool
    /// schemas.
    pub fn edit_client(&self, id: &str, mut config: ClientConfig) -> Result<(), ManagerError> {
        let handle = self
            .registry
            .get(id)
            .ok_or_else(|| ManagerError::UnknownClient(id.to_string()))?;
        let old = handle.config();
        if config.connection.kind() != old.connection.kind() {
            return Err(ManagerError::ConnectionTypeChange(id.to_string()));
        }
        if id == INTERNAL_CLIENT_ID && config.name != old.name {
            return Err(ManagerError::ReservedClient(id.to_string()));
        }
        config.id = id.to_string();

        let old_name = handle.name();
        let transport_changed = config.connection != old.connection;
        handle.update_config(config);
        let new_name = handle.name();
        if new_name != old_name {
            self.registry.release_name(&old_name, id);
            if handle.state() == ClientState::Connected {
                self.registry.claim_name(&new_name, id);
            }
        }

        if transport_changed && id != INTERNAL_CLIENT_ID {
            let events_tx = self
                .events
                .get(id)
                .map(|tx| tx.clone())
                .unwrap_or_else(|| mpsc::unbounded_channel().0);
            let new_driver = build_driver(&handle.config().connection, events_tx);
            let old_driver = handle.driver();
            handle.swap_driver(new_driver);
            handle.set_state(ClientState::Connecting);
            tokio::spawn(async move {
                old_driver.close().await;
            });
            if let Some(kick) = self.kicks.get(id) {
                kick.notify_one();
            }
            debug!(client = id, "transport config changed; driver restarted");
        }
        Ok(())
    }

    /// Forces a close + reconnect of a client.
    pub fn reconnect_client(&self, id: &str) -> Result<(), ManagerError> {
        let handle = self
            .registry
            .get(id)
            .ok_or_else(|| ManagerError::UnknownClient(id.to_string()))?;
        if id == INTERNAL_CLIENT_ID {
            return Ok(());
        }
        handle.set_state(ClientState::Disconnected);
        let driver = handle.driver();
        tokio::spawn(async move {
            driver.close().await;
        });
        if let Some(kick) = self.kicks.get(id) {
            kick.notify_one();
        }
        Ok(())
    }

    /// Snapshots of all clients, sorted by name.
    pub fn get_clients(&self) -> Vec<ClientSnapshot> {
        let mut out: Vec<ClientSnapshot> = self
            .registry
            .all()
            .into_iter()
            .map(|handle| {
                let config = handle.config();
                let mut tools: Vec<String> = handle.tools().keys().cloned().collect();
                tools.sort();
                ClientSnapshot {
                    id: handle.id.clone(),
                    name: handle.name(),
                    state: handle.state(),
                    connection: config.connection.kind(),
                    is_code_mode_client: config.is_code_mode_client,
                    tools,
                    connected_at: handle.connected_at(),
                }
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// The tools each client exposes to the LLM under this context. When a
    /// code-mode client is visible the three meta-tools are appended under
    /// the internal client's entry name.
    pub fn tools_per_client(&self, ctx: &ExecContext) -> HashMap<String, Vec<ToolSchema>> {
        let mut out: HashMap<String, Vec<ToolSchema>> = HashMap::new();
        for (handle, tools) in self.registry.tools_per_client(ctx) {
            out.insert(handle.id.clone(), tools);
        }
        if self.registry.has_code_mode_clients(ctx) {
            out.entry(INTERNAL_CLIENT_ID.to_string())
                .or_default()
                .extend(codemode::meta_tool_schemas());
        }
        out
    }

    /// Executes one chat tool call.
    pub async fn execute_chat_mcp_tool(
        &self,
        ctx: &ExecContext,
        call: &ChatToolCall,
    ) -> Result<ChatMessage, ToolCallError> {
        self.executor.execute_chat(ctx, call).await
    }

    /// Executes one responses function call.
    pub async fn execute_responses_mcp_tool(
        &self,
        ctx: &ExecContext,
        item: &ResponsesItem,
    ) -> Result<ResponsesItem, ToolCallError> {
        self.executor.execute_responses(ctx, item).await
    }

    /// Default chat tool-execution callback, backed by this manager's
    /// executor.
    pub fn chat_tool_exec(&self) -> ChatToolExec {
        let executor = Arc::clone(&self.executor);
        Arc::new(move |ctx, call| {
            let executor = Arc::clone(&executor);
            Box::pin(async move { executor.execute_chat(&ctx, &call).await })
        })
    }

    /// Default responses tool-execution callback.
    pub fn responses_tool_exec(&self) -> ResponsesToolExec {
        let executor = Arc::clone(&self.executor);
        Arc::new(move |ctx, item| {
            let executor = Arc::clone(&executor);
            Box::pin(async move { executor.execute_responses(&ctx, &item).await })
        })
    }

    /// Auto-execution policy under a context: the filter engine's verdict,
    /// plus the meta-tools whenever code mode is active.
    fn auto_check(&self, ctx: &ExecContext) -> AutoCheck {
        let registry = Arc::clone(&self.registry);
        let ctx = ctx.clone();
        Arc::new(move |name: &str| {
            if codemode::is_meta_tool(name) {
                return registry.has_code_mode_clients(&ctx);
            }
            match registry.lookup(name, &ctx) {
                Ok((handle, bare)) => filter::is_auto_executable(&handle.config(), &ctx, &bare),
                Err(_) => false,
            }
        })
    }

    /// Runs the agent loop for a chat request. `tool_exec` defaults to this
    /// manager's executor when not injected.
    pub async fn check_and_execute_agent_for_chat_request(
        &self,
        ctx: &ExecContext,
        req: &ChatRequest,
        initial_response: ChatResponse,
        llm_caller: ChatLlmCaller,
        tool_exec: Option<ChatToolExec>,
    ) -> Result<ChatResponse, ToolCallError> {
        let exec = tool_exec.unwrap_or_else(|| self.chat_tool_exec());
        let is_auto = self.auto_check(ctx);
        let max_depth = self.config().max_agent_depth;
        agent::run_chat_agent(ctx, req, initial_response, &llm_caller, &exec, &is_auto, max_depth)
            .await
    }

    /// Runs the agent loop for a responses request.
    pub async fn check_and_execute_agent_for_responses_request(
        &self,
        ctx: &ExecContext,
        req: &ResponsesRequest,
        initial_response: ResponsesResponse,
        llm_caller: ResponsesLlmCaller,
        tool_exec: Option<ResponsesToolExec>,
    ) -> Result<ResponsesResponse, ToolCallError> {
        let exec = tool_exec.unwrap_or_else(|| self.responses_tool_exec());
        let is_auto = self.auto_check(ctx);
        let max_depth = self.config().max_agent_depth;
        agent::run_responses_agent(
            ctx,
            req,
            initial_response,
            &llm_caller,
            &exec,
            &is_auto,
            max_depth,
        )
        .await
    }

    /// Test/diagnostic access to the internal in-process driver.
    pub fn local_driver(&self) -> &Arc<InProcessDriver> {
        &self.local_driver
    }

    /// Cancels every background task and closes every driver.
    pub async fn shutdown(&self) {
        self.root_cancel.cancel();
        for entry in self.tasks.iter() {
            for task in entry.value() {
                task.abort();
            }
        }
        for handle in self.registry.all() {
            handle.cancel.cancel();
            handle.driver().close().await;
        }
    }
}

impl Default for ToolManager {
    fn default() -> Self {
        Self::new(ToolManagerConfig::default())
    }
}

fn spawn_event_listener(
    handle: Arc<ClientHandle>,
    mut events_rx: mpsc::UnboundedReceiver<DriverEvent>,
    kick: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            if handle.cancel.is_cancelled() {
                break;
            }
            match event {
                DriverEvent::Disconnected => {
                    if handle.state() == ClientState::Connected {
                        warn!(client = %handle.id, "transport dropped; marking disconnected");
                        handle.set_state(ClientState::Disconnected);
                    }
                    kick.notify_one();
                }
                DriverEvent::ToolsListChanged => {
                    let driver = handle.driver();
                    match driver.list_tools().await {
                        Ok(tools) => {
                            debug!(client = %handle.id, count = tools.len(), "tool list refreshed");
                            handle.publish_tools(tools);
                        }
                        Err(e) => {
                            warn!(client = %handle.id, error = %e, "tool list refresh failed");
                        }
                    }
                }
            }
        }
    })
}

fn spawn_health_loop(
    registry: Arc<ToolRegistry>,
    handle: Arc<ClientHandle>,
    kick: Arc<Notify>,
    root_cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = RECONNECT_BACKOFF_INITIAL;
        let mut ping_failures: u32 = 0;
        loop {
            if handle.cancel.is_cancelled() || root_cancel.is_cancelled() {
                break;
            }
            match handle.state() {
                ClientState::Connected => {
                    tokio::select! {
                        _ = handle.cancel.cancelled() => break,
                        _ = root_cancel.cancelled() => break,
                        _ = kick.notified() => {}
                        _ = tokio::time::sleep(PING_INTERVAL) => {
                            let driver = handle.driver();
                            match driver.ping().await {
                                Ok(()) => ping_failures = 0,
                                Err(e) => {
                                    ping_failures += 1;
                                    warn!(
                                        client = %handle.id,
                                        failures = ping_failures,
                                        error = %e,
                                        "ping failed"
                                    );
                                    if ping_failures >= PING_FAILURE_THRESHOLD {
                                        handle.set_state(ClientState::Disconnected);
                                        ping_failures = 0;
                                    }
                                }
                            }
                        }
                    }
                }
                _ => {
                    let driver = handle.driver();
                    let connected = match driver.connect().await {
                        Ok(()) => match driver.list_tools().await {
                            Ok(tools) => {
                                handle.publish_tools(tools);
                                if !registry.claim_name(&handle.name(), &handle.id) {
                                    warn!(
                                        client = %handle.id,
                                        name = %handle.name(),
                                        "name prefix owned by another client; tools unreachable until it is removed"
                                    );
                                }
                                handle.set_state(ClientState::Connected);
                                info!(client = %handle.id, "client connected");
                                true
                            }
                            Err(e) => {
                                warn!(client = %handle.id, error = %e, "tools/list failed after connect");
                                driver.close().await;
                                handle.set_state(ClientState::Disconnected);
                                false
                            }
                        },
                        Err(e) => {
                            debug!(client = %handle.id, error = %e, "connect attempt failed");
                            handle.set_state(ClientState::Disconnected);
                            false
                        }
                    };
                    if connected {
                        backoff = RECONNECT_BACKOFF_INITIAL;
                        ping_failures = 0;
                        continue;
                    }
                    tokio::select! {
                        _ = handle.cancel.cancelled() => break,
                        _ = root_cancel.cancelled() => break,
                        _ = kick.notified() => {}
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(RECONNECT_BACKOFF_CAP);
                }
            }
        }
    })
}
