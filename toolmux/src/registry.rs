//! Tool registry: per-client catalogs, name mangling, prefixed lookup.
//!
//! The visible name of a tool is `{client}-{tool}` where `{client}` is the
//! sanitized client name. Sanitized names contain no `-`, so resolution
//! splits a prefixed name at the first `-` and never scans for substrings.
//! The reserved internal client's tools are additionally resolvable by bare
//! name. Tool maps are swapped atomically on (re)connect; readers always see
//! a consistent snapshot.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use mcp_wire::ToolSchema;

use crate::config::{ClientConfig, ClientState};
use crate::context::ExecContext;
use crate::driver::ConnectionDriver;
use crate::error::{ManagerError, ToolCallError};
use crate::filter;

/// Id of the reserved internal client backing `register_tool`.
pub const INTERNAL_CLIENT_ID: &str = "local";
/// Name of the reserved internal client.
pub const INTERNAL_CLIENT_NAME: &str = "local";

/// Maps every character outside `[A-Za-z0-9_]` to `_`; prepends `_` when the
/// result would start with a digit. Never lowercases. The output is both a
/// valid name-mangling prefix (no `-`) and a valid sandbox identifier.
pub fn sanitize_name(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Visible tool name: `{sanitized client}-{tool}`.
pub fn mangle_name(client_name: &str, tool: &str) -> String {
    format!("{}-{}", sanitize_name(client_name), tool)
}

/// One registered client: config, driver, observed state, tool snapshot.
pub struct ClientHandle {
    pub id: String,
    name: RwLock<String>,
    config: RwLock<ClientConfig>,
    driver: RwLock<Arc<dyn ConnectionDriver>>,
    state: RwLock<ClientState>,
    tools: RwLock<Arc<HashMap<String, ToolSchema>>>,
    /// Cancelled on removal; in-flight calls routed to this client select on it.
    pub cancel: CancellationToken,
    connected_at: RwLock<Option<DateTime<Utc>>>,
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle").field("id", &self.id).finish_non_exhaustive()
    }
}

impl ClientHandle {
    pub fn new(config: ClientConfig, driver: Arc<dyn ConnectionDriver>) -> Self {
        let name = sanitize_name(&config.name);
        Self {
            id: config.id.clone(),
            name: RwLock::new(name),
            config: RwLock::new(config),
            driver: RwLock::new(driver),
            state: RwLock::new(ClientState::Connecting),
            tools: RwLock::new(Arc::new(HashMap::new())),
            cancel: CancellationToken::new(),
            connected_at: RwLock::new(None),
        }
    }

    pub fn name(&self) -> String {
        self.name.read().map(|n| n.clone()).unwrap_or_default()
    }

    pub fn config(&self) -> ClientConfig {
        self.config
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn update_config(&self, config: ClientConfig) {
        let name = sanitize_name(&config.name);
        if let Ok(mut guard) = self.config.write() {
            *guard = config;
        }
        if let Ok(mut guard) = self.name.write() {
            *guard = name;
        }
    }

    pub fn driver(&self) -> Arc<dyn ConnectionDriver> {
        self.driver
            .read()
            .map(|d| Arc::clone(&d))
            .unwrap_or_else(|e| Arc::clone(&e.into_inner()))
    }

    pub fn swap_driver(&self, driver: Arc<dyn ConnectionDriver>) {
        if let Ok(mut guard) = self.driver.write() {
            *guard = driver;
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
            .read()
            .map(|s| *s)
            .unwrap_or(ClientState::Error)
    }

    pub fn set_state(&self, state: ClientState) {
        if let Ok(mut guard) = self.state.write() {
            *guard = state;
        }
        if state == ClientState::Connected {
            if let Ok(mut at) = self.connected_at.write() {
                *at = Some(Utc::now());
            }
        }
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.connected_at.read().ok().and_then(|at| *at)
    }

    /// Current tool snapshot; callers hold the `Arc`, not the lock.
    pub fn tools(&self) -> Arc<HashMap<String, ToolSchema>> {
        self.tools
            .read()
            .map(|t| Arc::clone(&t))
            .unwrap_or_else(|e| Arc::clone(&e.into_inner()))
    }

    /// Replaces the tool snapshot with a pointer swap.
    pub fn publish_tools(&self, schemas: Vec<ToolSchema>) {
        let map: HashMap<String, ToolSchema> = schemas
            .into_iter()
            .map(|schema| (schema.name.clone(), schema))
            .collect();
        if let Ok(mut guard) = self.tools.write() {
            *guard = Arc::new(map);
        }
    }
}

/// Client table plus the name-prefix claims used for lookup.
///
/// Prefix claims are first-connected-wins: when two clients sanitize to the
/// same name, the first one to publish tools owns the prefix until removed.
pub struct ToolRegistry {
    clients: DashMap<String, Arc<ClientHandle>>,
    by_name: RwLock<HashMap<String, String>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            by_name: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, handle: Arc<ClientHandle>) -> Result<(), ManagerError> {
        match self.clients.entry(handle.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(ManagerError::DuplicateClient(handle.id.clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(handle);
                Ok(())
            }
        }
    }

    pub fn remove(&self, id: &str) -> Option<Arc<ClientHandle>> {
        let (_, handle) = self.clients.remove(id)?;
        self.release_name(&handle.name(), id);
        Some(handle)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ClientHandle>> {
        self.clients.get(id).map(|h| Arc::clone(&h))
    }

    pub fn all(&self) -> Vec<Arc<ClientHandle>> {
        self.clients.iter().map(|h| Arc::clone(&h)).collect()
    }

    /// Claims a name prefix for a client; the first claim wins. Returns
    /// whether this client now owns the prefix.
    pub fn claim_name(&self, name: &str, id: &str) -> bool {
        let Ok(mut guard) = self.by_name.write() else {
            return false;
        };
        match guard.get(name) {
            Some(owner) if owner != id => {
                debug!(%name, %id, %owner, "name prefix already claimed");
                false
            }
            _ => {
                guard.insert(name.to_string(), id.to_string());
                true
            }
        }
    }

    /// Releases a prefix claim if this client owns it.
    pub fn release_name(&self, name: &str, id: &str) {
        if let Ok(mut guard) = self.by_name.write() {
            if guard.get(name).is_some_and(|owner| owner == id) {
                guard.remove(name);
            }
        }
    }

    /// Resolves a sanitized client name to its owning handle.
    pub fn resolve_name(&self, name: &str) -> Option<Arc<ClientHandle>> {
        let id = self.by_name.read().ok()?.get(name)?.clone();
        self.get(&id)
    }

    /// Resolves a visible tool name to `(client, bare tool name)`, applying
    /// the filter engine. Prefixed lookup first; the internal client's tools
    /// also resolve by bare name.
    pub fn lookup(
        &self,
        visible_name: &str,
        ctx: &ExecContext,
    ) -> Result<(Arc<ClientHandle>, String), ToolCallError> {
        if let Some((prefix, tool)) = visible_name.split_once('-') {
            if let Some(handle) = self.resolve_name(prefix) {
                if !tool.is_empty() && handle.tools().contains_key(tool) {
                    let config = handle.config();
                    if !filter::is_executable(&config, ctx, tool) {
                        return Err(ToolCallError::not_permitted(visible_name));
                    }
                    return Ok((handle, tool.to_string()));
                }
            }
        }

        // Bare-name fallback for the reserved internal client.
        if let Some(handle) = self.get(INTERNAL_CLIENT_ID) {
            if handle.tools().contains_key(visible_name) {
                let config = handle.config();
                if !filter::is_executable(&config, ctx, visible_name) {
                    return Err(ToolCallError::not_permitted(visible_name));
                }
                return Ok((handle, visible_name.to_string()));
            }
        }

        Err(ToolCallError::not_found(visible_name))
    }

    /// The tools each connected client exposes under the active context,
    /// after filtering. Code-mode clients are omitted: their tools surface
    /// through the code-mode meta-tools instead.
    pub fn tools_per_client(
        &self,
        ctx: &ExecContext,
    ) -> Vec<(Arc<ClientHandle>, Vec<ToolSchema>)> {
        let mut out: Vec<(Arc<ClientHandle>, Vec<ToolSchema>)> = Vec::new();
        for handle in self.clients.iter() {
            if handle.state() != ClientState::Connected {
                continue;
            }
            let config = handle.config();
            if config.is_code_mode_client {
                continue;
            }
            let tools = handle.tools();
            let mut allowed: Vec<ToolSchema> = tools
                .values()
                .filter(|schema| filter::is_executable(&config, ctx, &schema.name))
                .cloned()
                .collect();
            if allowed.is_empty() {
                continue;
            }
            allowed.sort_by(|a, b| a.name.cmp(&b.name));
            out.push((Arc::clone(&handle), allowed));
        }
        out.sort_by_key(|(handle, _)| handle.name());
        out
    }

    /// Like [`tools_per_client`](Self::tools_per_client) but restricted to
    /// code-mode clients; used by the binding generator.
    pub fn code_mode_clients(
        &self,
        ctx: &ExecContext,
    ) -> Vec<(Arc<ClientHandle>, Vec<ToolSchema>)> {
        let mut out: Vec<(Arc<ClientHandle>, Vec<ToolSchema>)> = Vec::new();
        for handle in self.clients.iter() {
            if handle.state() != ClientState::Connected {
                continue;
            }
            let config = handle.config();
            if !config.is_code_mode_client {
                continue;
            }
            if !filter::client_included(ctx, &config.name) {
                continue;
            }
            let tools = handle.tools();
            let mut allowed: Vec<ToolSchema> = tools
                .values()
                .filter(|schema| filter::is_executable(&config, ctx, &schema.name))
                .cloned()
                .collect();
            allowed.sort_by(|a, b| a.name.cmp(&b.name));
            out.push((Arc::clone(&handle), allowed));
        }
        out.sort_by_key(|(handle, _)| handle.name());
        out
    }

    /// True when at least one connected code-mode client is visible under the
    /// context; gates the meta-tool surface.
    pub fn has_code_mode_clients(&self, ctx: &ExecContext) -> bool {
        !self.code_mode_clients(ctx).is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::driver::InProcessDriver;
    use serde_json::json;

    fn handle(id: &str, name: &str, execute: Option<Vec<&str>>) -> Arc<ClientHandle> {
        let mut config = ClientConfig::new(id, name, ConnectionConfig::InProcess);
        config.tools_to_execute = execute.map(|v| v.into_iter().map(String::from).collect());
        let handle = Arc::new(ClientHandle::new(config, Arc::new(InProcessDriver::new())));
        handle.set_state(ClientState::Connected);
        handle
    }

    #[test]
    fn sanitize_maps_disallowed_characters_without_lowercasing() {
        assert_eq!(sanitize_name("GitHub"), "GitHub");
        assert_eq!(sanitize_name("my-server.v2"), "my_server_v2");
        assert_eq!(sanitize_name("9lives"), "_9lives");
        assert_eq!(mangle_name("my-server", "read"), "my_server-read");
    }

    #[test]
    fn lookup_resolves_prefixed_names() {
        let registry = ToolRegistry::new();
        let fs = handle("c1", "fs", Some(vec!["*"]));
        fs.publish_tools(vec![ToolSchema::new("read_file", None, json!({}))]);
        registry.insert(Arc::clone(&fs)).unwrap();
        registry.claim_name("fs", "c1");

        let ctx = ExecContext::new();
        let (resolved, tool) = registry.lookup("fs-read_file", &ctx).unwrap();
        assert_eq!(resolved.id, "c1");
        assert_eq!(tool, "read_file");

        let err = registry.lookup("fs-write_file", &ctx).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn lookup_denies_filtered_tools() {
        let registry = ToolRegistry::new();
        let fs = handle("c1", "fs", Some(vec!["read_file"]));
        fs.publish_tools(vec![
            ToolSchema::new("read_file", None, json!({})),
            ToolSchema::new("write_file", None, json!({})),
        ]);
        registry.insert(Arc::clone(&fs)).unwrap();
        registry.claim_name("fs", "c1");

        let ctx = ExecContext::new();
        assert!(registry.lookup("fs-read_file", &ctx).is_ok());
        let err = registry.lookup("fs-write_file", &ctx).unwrap_err();
        assert!(err.to_string().contains("not permitted"));
    }

    #[test]
    fn internal_tools_resolve_by_bare_name() {
        let registry = ToolRegistry::new();
        let local = handle(INTERNAL_CLIENT_ID, INTERNAL_CLIENT_NAME, Some(vec!["*"]));
        local.publish_tools(vec![ToolSchema::new("echo", None, json!({}))]);
        registry.insert(Arc::clone(&local)).unwrap();
        registry.claim_name(INTERNAL_CLIENT_NAME, INTERNAL_CLIENT_ID);

        let ctx = ExecContext::new();
        let (_, tool) = registry.lookup("echo", &ctx).unwrap();
        assert_eq!(tool, "echo");
        // The mangled form resolves too.
        let (_, tool) = registry.lookup("local-echo", &ctx).unwrap();
        assert_eq!(tool, "echo");
    }

    #[test]
    fn first_connected_client_wins_name_conflicts() {
        let registry = ToolRegistry::new();
        let first = handle("c1", "dup", Some(vec!["*"]));
        first.publish_tools(vec![ToolSchema::new("a", None, json!({}))]);
        let second = handle("c2", "dup", Some(vec!["*"]));
        second.publish_tools(vec![ToolSchema::new("a", None, json!({}))]);
        registry.insert(Arc::clone(&first)).unwrap();
        registry.insert(Arc::clone(&second)).unwrap();
        assert!(registry.claim_name("dup", "c1"));
        assert!(!registry.claim_name("dup", "c2"));

        let (resolved, _) = registry.lookup("dup-a", &ExecContext::new()).unwrap();
        assert_eq!(resolved.id, "c1");

        // Removing the winner releases the prefix for the survivor.
        registry.remove("c1");
        assert!(registry.claim_name("dup", "c2"));
        let (resolved, _) = registry.lookup("dup-a", &ExecContext::new()).unwrap();
        assert_eq!(resolved.id, "c2");
    }

    #[test]
    fn tools_per_client_applies_filters_and_skips_code_mode() {
        let registry = ToolRegistry::new();
        let fs = handle("c1", "fs", Some(vec!["read_file"]));
        fs.publish_tools(vec![
            ToolSchema::new("read_file", None, json!({})),
            ToolSchema::new("write_file", None, json!({})),
        ]);
        registry.insert(fs).unwrap();

        let mut code_cfg = ClientConfig::new("c2", "code", ConnectionConfig::InProcess)
            .with_tools_to_execute(vec!["*".into()])
            .with_code_mode(true);
        code_cfg.tools_to_auto_execute = None;
        let code = Arc::new(ClientHandle::new(code_cfg, Arc::new(InProcessDriver::new())));
        code.set_state(ClientState::Connected);
        code.publish_tools(vec![ToolSchema::new("run", None, json!({}))]);
        registry.insert(Arc::clone(&code)).unwrap();

        let per_client = registry.tools_per_client(&ExecContext::new());
        assert_eq!(per_client.len(), 1);
        let (handle, tools) = &per_client[0];
        assert_eq!(handle.id, "c1");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "read_file");

        let code_clients = registry.code_mode_clients(&ExecContext::new());
        assert_eq!(code_clients.len(), 1);
        assert_eq!(code_clients[0].0.id, "c2");
    }

    #[test]
    fn disconnected_clients_are_invisible_in_listings() {
        let registry = ToolRegistry::new();
        let fs = handle("c1", "fs", Some(vec!["*"]));
        fs.publish_tools(vec![ToolSchema::new("read_file", None, json!({}))]);
        fs.set_state(ClientState::Disconnected);
        registry.insert(fs).unwrap();
        assert!(registry.tools_per_client(&ExecContext::new()).is_empty());
    }
}
